use crate::error::BridgeError;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

fn command_with_limited_env(program: &Path) -> Command {
    let mut command = Command::new(program);
    command
        .env_remove("LD_LIBRARY_PATH")
        .env_remove("APPIMAGE")
        .env_remove("APPDIR");
    command
}

/// Builds `<command...> start -p <port>` for the chii bridge.
///
/// `command` may carry its own arguments (`npx chii`); the program is looked
/// up on `PATH` so npm shims such as `chii.cmd` resolve on Windows.
pub fn create_bridge_command(command: &str, port: u16, cwd: &Path) -> Result<Command, BridgeError> {
    let parts: Vec<&str> = command.split_whitespace().collect();
    let (program, args) = parts.split_first().ok_or(BridgeError::EmptyCommand)?;

    let program_path =
        which::which_in(program, std::env::var_os("PATH"), cwd).map_err(|_| {
            BridgeError::NotFound(program.to_string())
        })?;

    let mut cmd = command_with_limited_env(&program_path);
    cmd.args(args)
        .arg("start")
        .arg("-p")
        .arg(port.to_string())
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(target_os = "windows")]
    cmd.creation_flags(CREATE_NO_WINDOW);

    // New process group so signals aimed at the dev server do not reach the bridge first
    #[cfg(unix)]
    cmd.process_group(0);

    Ok(cmd)
}

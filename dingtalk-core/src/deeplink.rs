use url::Url;

const DINGTALK_LINK: &str = "dingtalk://dingtalkclient/page/link";

/// Adds the DingTalk tab marker and the optional organization id to `base`.
pub fn build_target_url(mut base: Url, corp_id: Option<&str>) -> Url {
    {
        let mut query = base.query_pairs_mut();
        query.append_pair("ddtab", "true");
        if let Some(corp_id) = corp_id.filter(|id| !id.is_empty()) {
            query.append_pair("corpId", corp_id);
        }
    }
    base
}

/// Base URL of the page when none is configured, from the gateway address.
pub fn infer_base_url(host: &str, port: u16, base: &str) -> String {
    let host = if host == "0.0.0.0" { "127.0.0.1" } else { host };
    format!("http://{}:{}{}", host, port, base)
}

/// URI that makes DingTalk open `target` in its in-app browser.
pub fn deep_link(target: &Url) -> String {
    format!(
        "{}?url={}",
        DINGTALK_LINK,
        urlencoding::encode(target.as_str())
    )
}

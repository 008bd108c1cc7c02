use tabdeck_core::DEFAULT_FAVICON_URL;
use url::Url;

pub const FAVICON_SERVICE_TEMPLATE: &str =
    "https://www.google.com/s2/favicons?domain={url}&sz=128";

/// Per-domain favicon heuristics. Links matching a direct rule serve their
/// own `/favicon.ico`; everything else goes through the public service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaviconRules {
    direct_hosts: Vec<String>,
    service_template: String,
    default_icon: String,
}

impl Default for FaviconRules {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl FaviconRules {
    pub fn new(direct_hosts: Vec<String>) -> Self {
        Self {
            direct_hosts: direct_hosts
                .into_iter()
                .map(|host| host.trim().to_ascii_lowercase())
                .filter(|host| !host.is_empty())
                .collect(),
            service_template: FAVICON_SERVICE_TEMPLATE.to_string(),
            default_icon: DEFAULT_FAVICON_URL.to_string(),
        }
    }

    pub fn icon_for(&self, link: &str) -> String {
        if !link.contains("https") {
            return self.default_icon.clone();
        }
        let lowered = link.to_ascii_lowercase();
        let direct = self
            .direct_hosts
            .iter()
            .any(|host| lowered.contains(host.as_str()));
        if !direct {
            return self.service_template.replace("{url}", link);
        }
        Url::parse(link)
            .ok()
            .and_then(|url| {
                let host = url.host_str()?;
                Some(match url.port() {
                    Some(port) => format!("{}://{host}:{port}/favicon.ico", url.scheme()),
                    None => format!("{}://{host}/favicon.ico", url.scheme()),
                })
            })
            .unwrap_or_else(|| self.default_icon.clone())
    }
}

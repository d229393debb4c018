use std::collections::BTreeMap;
use std::sync::Mutex;

/// Session cookies kept between forum requests.
///
/// Only cookies whose names start with one of the allowed prefixes are
/// retained. Names are stored lowercased and values are HTML-entity decoded.
#[derive(Debug)]
pub struct CookieJar {
    allowed_prefixes: Vec<String>,
    cookies: Mutex<BTreeMap<String, String>>,
}

impl CookieJar {
    pub fn new<I, S>(allowed_prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_prefixes: allowed_prefixes
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            cookies: Mutex::new(BTreeMap::new()),
        }
    }

    fn is_allowed(&self, name: &str) -> bool {
        self.allowed_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    /// Absorb one `Set-Cookie` header value.
    ///
    /// Every `name=value` pair of the header is considered, attributes
    /// included; attribute names never match the allow-list in practice.
    pub fn absorb(&self, set_cookie: &str) {
        let mut cookies = match self.cookies.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        for pair in set_cookie.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim().to_lowercase();
            if name.is_empty() || !self.is_allowed(&name) {
                continue;
            }
            let value = html_escape::decode_html_entities(value.trim()).into_owned();
            cookies.insert(name, value);
        }
    }

    pub fn absorb_all<'a>(&self, headers: impl IntoIterator<Item = &'a str>) {
        for header in headers {
            self.absorb(header);
        }
    }

    /// Value for a `Cookie` request header, if any cookie is held.
    pub fn header_value(&self) -> Option<String> {
        let cookies = match self.cookies.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if cookies.is_empty() {
            return None;
        }

        Some(
            cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn len(&self) -> usize {
        self.cookies.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

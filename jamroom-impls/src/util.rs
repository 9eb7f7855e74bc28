use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Matches an optional http(s) scheme at the start of a url, to normalize it to https.
    pub static ref URL_SCHEME_REGEX: Regex = Regex::new(r"^(https?://)?").unwrap();
}

/// Parses user input as a url, adding the scheme if it was left out.
pub fn normalize_url(input: &str) -> Option<url::Url> {
    let input = URL_SCHEME_REGEX.replace(input.trim(), "https://");
    url::Url::parse(&input).ok()
}

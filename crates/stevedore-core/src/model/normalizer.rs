//! Canonicalization of deployment locations before indexing.

use url::Url;

/// Maps equivalent location spellings onto one canonical form so that the
/// model's location index collides correctly.
pub trait LocationNormalizer: Send + Sync {
    fn normalize(&self, location: &Url) -> Url;
}

/// Default canonical form: the parsed URL (scheme and host already
/// lowercased, dot segments resolved) with any trailing slash removed from
/// a non-root path.
#[derive(Debug, Default)]
pub struct StandardNormalizer;

impl LocationNormalizer for StandardNormalizer {
    fn normalize(&self, location: &Url) -> Url {
        let mut url = location.clone();
        let path = url.path();
        if path.len() > 1 && path.ends_with('/') {
            let trimmed = path.trim_end_matches('/').to_string();
            url.set_path(&trimmed);
        }
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_collapses() {
        let n = StandardNormalizer;
        let a = Url::parse("file:///deploy/app").unwrap();
        let b = Url::parse("file:///deploy/app/").unwrap();
        assert_eq!(n.normalize(&a), n.normalize(&b));
    }

    #[test]
    fn root_path_is_left_alone() {
        let n = StandardNormalizer;
        let root = Url::parse("file:///").unwrap();
        assert_eq!(n.normalize(&root).path(), "/");
    }

    #[test]
    fn scheme_case_is_canonical_after_parse() {
        let n = StandardNormalizer;
        let url = Url::parse("FILE:///deploy/app").unwrap();
        assert_eq!(n.normalize(&url).scheme(), "file");
    }
}

use std::fmt;

pub const IMAGE_SUFFIX: &str = "_image";
pub const EMBEDDING_SUFFIX: &str = "_embedding";

/// Identifies one page of one document within a session's cache: `{file}_{page}`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheEntryKey(String);

impl CacheEntryKey {
    #[inline]
    pub fn new(file_name: &str, page_index: usize) -> Self {
        Self(format!("{}_{}", file_name, page_index))
    }

    /// Wrap an already composed base key
    #[inline]
    pub fn from_base(base: impl Into<String>) -> Self {
        Self(base.into())
    }

    /// Recover the base key from a raw `{key}_embedding` store key
    #[inline]
    pub fn from_embedding_key(raw: &str) -> Option<Self> {
        raw.strip_suffix(EMBEDDING_SUFFIX)
            .filter(|base| !base.is_empty())
            .map(|base| Self(base.to_string()))
    }

    /// Recover the base key from a raw `{key}_image` store key
    #[inline]
    pub fn from_image_key(raw: &str) -> Option<Self> {
        raw.strip_suffix(IMAGE_SUFFIX)
            .filter(|base| !base.is_empty())
            .map(|base| Self(base.to_string()))
    }

    #[inline]
    pub fn image_key(&self) -> String {
        format!("{}{}", self.0, IMAGE_SUFFIX)
    }

    #[inline]
    pub fn embedding_key(&self) -> String {
        format!("{}{}", self.0, EMBEDDING_SUFFIX)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(file_name, page_index)` when the key follows the `{file}_{page}` shape
    #[inline]
    pub fn file_and_page(&self) -> Option<(&str, usize)> {
        let (file, page) = self.0.rsplit_once('_')?;
        page.parse().ok().map(|page| (file, page))
    }
}

impl fmt::Display for CacheEntryKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

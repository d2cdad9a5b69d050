use std::path::{Path, PathBuf};

use log::info;
use regex::Regex;
use walkdir::WalkDir;

/// 默认识别为图片的扩展名
pub const DEFAULT_IMAGE_SUFFIX: &str = "jpg,jpeg,png,webp,bmp,gif,tif,tiff";

/// 图库中的一个条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryItem {
    /// 稳定的条目 ID
    pub id: String,
    /// 小写扩展名，不含点
    pub ext: String,
    /// 原图路径
    pub path: PathBuf,
    /// 缩略图路径
    pub thumbnail: Option<PathBuf>,
}

impl LibraryItem {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ext = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        Self { id: id.into(), ext, path, thumbnail: None }
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<PathBuf>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    /// 计算指纹时读取的文件，有缩略图时优先使用缩略图
    pub fn pixel_source(&self) -> &Path {
        self.thumbnail.as_deref().unwrap_or(&self.path)
    }
}

/// 按扩展名判断是否为图片
#[derive(Debug, Clone)]
pub struct SuffixFilter(Regex);

impl SuffixFilter {
    /// `suffix` 为逗号分隔的扩展名列表，忽略大小写
    pub fn new(suffix: &str) -> Result<Self, regex::Error> {
        let suffix = suffix.split(',').map(|s| regex::escape(s.trim())).collect::<Vec<_>>().join("|");
        Ok(Self(Regex::new(&format!("(?i)^({suffix})$"))?))
    }

    pub fn is_match(&self, ext: &str) -> bool {
        self.0.is_match(ext)
    }
}

impl Default for SuffixFilter {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_SUFFIX).expect("default suffix is a valid regex")
    }
}

/// 扫描目录下的所有文件，ID 为相对于根目录的路径
pub fn scan_library(root: &Path) -> Vec<LibraryItem> {
    info!("开始扫描目录: {}", root.display());
    let items = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| {
            let entry = entry.ok()?;
            if !entry.file_type().is_file() {
                return None;
            }
            let path = entry.into_path();
            let id = item_id(root, &path)?;
            Some(LibraryItem::new(id, path))
        })
        .collect::<Vec<_>>();
    info!("扫描完成，共 {} 个文件", items.len());
    items
}

/// 条目 ID：相对路径，统一使用 `/` 分隔
pub fn item_id(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>();
    if parts.is_empty() { None } else { Some(parts.join("/")) }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_suffix_filter() {
        let filter = SuffixFilter::new("jpg,png").unwrap();
        assert!(filter.is_match("jpg"));
        assert!(filter.is_match("PNG"));
        assert!(!filter.is_match("jpgx"));
        assert!(!filter.is_match("txt"));
        assert!(!filter.is_match(""));
        assert!(SuffixFilter::default().is_match("webp"));
    }

    #[test]
    fn test_library_item_ext() {
        let item = LibraryItem::new("a/b.JPG", "/lib/a/b.JPG");
        assert_eq!(item.ext, "jpg");
        assert_eq!(item.pixel_source(), Path::new("/lib/a/b.JPG"));
        let item = item.with_thumbnail("/thumbs/b.png");
        assert_eq!(item.pixel_source(), Path::new("/thumbs/b.png"));
        assert_eq!(LibraryItem::new("noext", "/lib/noext").ext, "");
    }

    #[test]
    fn test_scan_library() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.png"), b"").unwrap();
        std::fs::write(dir.path().join("sub").join("a.txt"), b"").unwrap();

        let items = scan_library(dir.path());
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["b.png", "sub/a.txt"]);
        assert_eq!(items[1].ext, "txt");
    }
}

use crate::common::*;

/// The optional cached file list inside an image directory.
pub const FILE_LIST_NAME: &str = "files.list";

/// Ordered image paths of the two pools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPaths {
    /// Shadow-free images. Their count defines the dataset length.
    pub target: Vec<PathBuf>,
    /// Shadow mattes, sampled independently of the target index.
    pub mask: Vec<PathBuf>,
}

impl DatasetPaths {
    /// Scans `<root>/shadow_free` and `<root>/matte`.
    pub fn scan<P>(root: P, extensions: &[String]) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let root = root.as_ref();
        let target = scan_images(root.join("shadow_free"), extensions)?;
        let mask = scan_images(root.join("matte"), extensions)?;
        Self::new(target, mask)
    }

    pub fn new(target: Vec<PathBuf>, mask: Vec<PathBuf>) -> Result<Self> {
        ensure!(!target.is_empty(), "no shadow-free images found");
        ensure!(!mask.is_empty(), "no matte images found");
        Ok(Self { target, mask })
    }
}

/// Lists image files under `dir` recursively in sorted order.
///
/// If `dir` contains a `files.list`, its lines are used instead of walking
/// the directory. Relative entries are resolved against `dir`.
pub fn scan_images<P>(dir: P, extensions: &[String]) -> Result<Vec<PathBuf>>
where
    P: AsRef<Path>,
{
    let dir = dir.as_ref();
    ensure!(dir.is_dir(), "{} is not a directory", dir.display());

    let list_file = dir.join(FILE_LIST_NAME);
    if list_file.is_file() {
        let text = fs::read_to_string(&list_file)
            .with_context(|| format!("unable to read {}", list_file.display()))?;
        let paths = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| dir.join(line))
            .collect_vec();
        debug!("read {} paths from {}", paths.len(), list_file.display());
        return Ok(paths);
    }

    let pattern = dir.join("**").join("*");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| format_err!("non-UTF-8 path {}", dir.display()))?;

    let mut paths = glob::glob(pattern)?
        .map(|entry| -> Result<PathBuf> { Ok(entry?) })
        .filter_ok(|path: &PathBuf| path.is_file() && has_image_extension(path, extensions))
        .collect::<Result<Vec<_>>>()?;
    paths.sort();

    debug!("found {} images in {}", paths.len(), dir.display());
    Ok(paths)
}

fn has_image_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

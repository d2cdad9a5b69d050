//! 语义嵌入能力
//!
//! 嵌入模型是可选的：模型缺失或加载失败是正常状态，
//! 索引器会跳过嵌入阶段，搜索则退化为像素模式。

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use image::DynamicImage;
use log::{info, warn};
use ndarray::{Array1, Array2};
use tokio::sync::OnceCell;
use tokio::task::spawn_blocking;

use crate::error::{Error, Result};

pub trait EmbeddingCapability: Send + Sync {
    /// 加载模型，返回是否可用
    ///
    /// 可重复调用；并发调用者会等待同一次加载并得到相同的结果
    fn init<'a>(&'a self, model: &'a Path) -> BoxFuture<'a, bool>;

    fn is_ready(&self) -> bool;

    /// 计算 L2 归一化的嵌入向量
    fn compute_embedding(&self, image: &DynamicImage) -> Result<Vec<f32>>;
}

/// 始终不可用的嵌入能力，未配置模型时使用
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEmbedding;

impl EmbeddingCapability for NoEmbedding {
    fn init<'a>(&'a self, _model: &'a Path) -> BoxFuture<'a, bool> {
        Box::pin(async { false })
    }

    fn is_ready(&self) -> bool {
        false
    }

    fn compute_embedding(&self, _image: &DynamicImage) -> Result<Vec<f32>> {
        Err(Error::EmbeddingUnavailable("未配置嵌入模型".to_string()))
    }
}

/// 线性投影模型
struct Projection {
    /// D x (3 * side * side) 的投影矩阵
    weights: Array2<f32>,
    /// 输入图片的边长
    side: u32,
}

impl Projection {
    fn load(path: &Path) -> std::result::Result<Self, String> {
        let weights: Array2<f32> =
            ndarray_npy::read_npy(path).map_err(|e| format!("读取模型失败: {e}"))?;
        let (dims, cols) = weights.dim();
        if dims == 0 || cols == 0 || cols % 3 != 0 {
            return Err(format!("模型形状无效: {dims}x{cols}"));
        }
        let side = ((cols / 3) as f64).sqrt().round() as u32;
        if (side * side * 3) as usize != cols {
            return Err(format!("模型输入维度 {cols} 不是 3 * N * N"));
        }
        Ok(Self { weights, side })
    }

    fn embed(&self, image: &DynamicImage) -> Option<Vec<f32>> {
        let rgb = image.thumbnail_exact(self.side, self.side).to_rgb8();
        let input: Array1<f32> = rgb.as_raw().iter().map(|&v| v as f32 / 127.5 - 1.).collect();
        l2_normalize(self.weights.dot(&input).to_vec())
    }
}

/// 从 `.npy` 文件加载投影矩阵的嵌入模型
///
/// 图片缩放到 side x side 的 RGB 后展平，与矩阵相乘得到 D 维向量
#[derive(Default)]
pub struct ProjectionEmbedder {
    // 加载失败时为 None，之后不再重试
    model: OnceCell<Option<Projection>>,
}

impl ProjectionEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    fn projection(&self) -> Option<&Projection> {
        self.model.get().and_then(Option::as_ref)
    }
}

impl EmbeddingCapability for ProjectionEmbedder {
    fn init<'a>(&'a self, model: &'a Path) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let loaded = self
                .model
                .get_or_init(|| load_projection(model.to_path_buf()))
                .await;
            loaded.is_some()
        })
    }

    fn is_ready(&self) -> bool {
        self.projection().is_some()
    }

    fn compute_embedding(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let projection = self
            .projection()
            .ok_or_else(|| Error::EmbeddingUnavailable("模型未加载".to_string()))?;
        projection
            .embed(image)
            .ok_or_else(|| Error::EmbeddingUnavailable("嵌入向量为零".to_string()))
    }
}

async fn load_projection(path: PathBuf) -> Option<Projection> {
    info!("加载嵌入模型: {}", path.display());
    let task_path = path.clone();
    match spawn_blocking(move || Projection::load(&task_path)).await {
        Ok(Ok(projection)) => {
            info!("嵌入模型加载完成，维数 {}", projection.weights.nrows());
            Some(projection)
        }
        Ok(Err(e)) => {
            warn!("嵌入模型不可用 {}: {}", path.display(), e);
            None
        }
        Err(e) => {
            warn!("嵌入模型加载任务失败: {e}");
            None
        }
    }
}

/// L2 归一化，零向量返回 None
pub fn l2_normalize(mut v: Vec<f32>) -> Option<Vec<f32>> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0. || !norm.is_finite() {
        return None;
    }
    v.iter_mut().for_each(|x| *x /= norm);
    Some(v)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use image::{Rgb, RgbImage};
    use ndarray_npy::write_npy;
    use tempfile::TempDir;

    use super::*;

    fn write_model(dir: &TempDir, dims: usize, side: usize) -> PathBuf {
        let path = dir.path().join("model.npy");
        let weights =
            Array2::from_shape_fn((dims, 3 * side * side), |(i, j)| ((i * 31 + j * 17) % 13) as f32 - 6.);
        write_npy(&path, &weights).unwrap();
        path
    }

    fn image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(20, 20, |x, y| Rgb([(x * 12) as u8, (y * 12) as u8, 90])))
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(vec![3., 4.]).unwrap();
        assert_eq!(v, vec![0.6, 0.8]);
        assert!(l2_normalize(vec![0., 0.]).is_none());
    }

    #[tokio::test]
    async fn test_no_embedding() {
        let cap = NoEmbedding;
        assert!(!cap.init(Path::new("model.npy")).await);
        assert!(!cap.is_ready());
        assert!(matches!(cap.compute_embedding(&image()), Err(Error::EmbeddingUnavailable(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_projection_concurrent_init() {
        let dir = TempDir::new().unwrap();
        let path = write_model(&dir, 8, 4);
        let embedder = Arc::new(ProjectionEmbedder::new());

        let (a, b) = tokio::join!(embedder.init(&path), embedder.init(&path));
        assert!(a && b);
        assert!(embedder.is_ready());

        let v = embedder.compute_embedding(&image()).unwrap();
        assert_eq!(v.len(), 8);
        let norm: f32 = v.iter().map(|x| x * x).sum();
        assert!((norm - 1.).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_projection_missing_model_is_permanent() {
        let dir = TempDir::new().unwrap();
        let embedder = ProjectionEmbedder::new();
        let missing = dir.path().join("missing.npy");
        assert!(!embedder.init(&missing).await);

        // 之后即使模型出现也不会重新加载
        let path = write_model(&dir, 4, 2);
        assert!(!embedder.init(&path).await);
        assert!(!embedder.is_ready());
        assert!(matches!(embedder.compute_embedding(&image()), Err(Error::EmbeddingUnavailable(_))));
    }

    #[test]
    fn test_projection_rejects_bad_shape() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.npy");
        write_npy(&path, &Array2::<f32>::zeros((4, 10))).unwrap();
        assert!(Projection::load(&path).is_err());
    }
}

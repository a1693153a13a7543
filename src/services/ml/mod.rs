pub mod knn;
pub mod similarity;
pub mod top_k;

pub use knn::{KnnModel, KnnParams, DEFAULT_NEIGHBORS};
pub use similarity::{cosine, SimilarityFn};
pub use top_k::TopK;

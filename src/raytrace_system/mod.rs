pub mod kdtree;
pub mod material;
pub mod obj;
pub mod ray;
pub mod scene;
pub mod triangle;

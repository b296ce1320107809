pub mod motion;

pub use motion::MotionBackend;

pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod ordering;
pub mod pairing;
pub mod settings;
pub mod slideshow;
pub mod subscription;
pub mod tasks {
    pub mod aspect;
    pub mod engine;
    pub mod viewer;
}

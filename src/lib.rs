//! imagecast — AI 图片生成工作台后端
//!
//! 核心是本地持久化与缓存层：图片二进制存在按键寻址的
//! Blob 存储，生成历史（纯元数据）存在独立的设置存储里，
//! 两者靠严格的写入/删除顺序保持一致。其上是可渲染句柄
//! 缓存、容量封顶的历史账本和可迁移的备份导入导出。

pub mod app;
pub mod backup;
pub mod cache;
pub mod history;
pub mod logger;
pub mod models;
pub mod providers;
pub mod storage;

pub use app::AppServices;

// DuckDB数据库模块
//
// 这个模块提供了一个线程安全的DuckDB存储实现，通过Actor模式确保
// DuckDB的单线程访问要求，同时对外实现异步的 Store 接口。
//
// 主要组件：
// - DuckDbManager: 实现 Store 的句柄，可任意克隆
// - DuckDbActor: 内部Actor，处理实际的数据库操作
// - 行模型与消息定义

mod actor;
mod manager;
mod messages;
mod models;

// 公开核心接口
pub use manager::DuckDbManager;

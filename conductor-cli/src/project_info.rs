/// 项目元数据（自动从 conductor-cli 的 Cargo.toml 同步）
pub mod metadata {
    /// 项目描述
    pub const PROJECT_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

    /// 项目作者
    pub const PROJECT_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

    /// 用户友好的显示名称
    pub mod display {
        pub const FRIENDLY_NAME: &str = "NodeConductor";

        /// 项目详细描述
        pub const DESCRIPTION_LONG: &str = "NodeConductor 备份编排运维工具，负责按计划创建资源备份、回收过期备份、跟踪备份/恢复/删除任务的执行状态";
    }
}

/// 版本信息
pub mod version_info {
    /// CLI 版本
    pub const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");
}

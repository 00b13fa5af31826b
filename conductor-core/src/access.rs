//! 按调用者可见范围过滤备份列表

use async_trait::async_trait;
use std::collections::HashSet;

use crate::Result;
use crate::models::{Backup, BackupFilter};
use crate::store::Store;
use crate::strategy::StrategyRegistry;

/// 由外围系统实现: 给出调用者在某一资源类型下可见的资源 ID
#[async_trait]
pub trait VisibilityResolver: Send + Sync {
    async fn visible_scope_ids(&self, principal: &str, kind: &str) -> Result<HashSet<String>>;
}

/// 返回满足过滤条件且调用者可见的备份
///
/// 每个已注册的资源类型分别查询一次可见集合，结果按创建时间升序。
pub async fn filter_visible_backups(
    store: &dyn Store,
    registry: &StrategyRegistry,
    resolver: &dyn VisibilityResolver,
    principal: &str,
    filter: &BackupFilter,
) -> Result<Vec<Backup>> {
    let mut visible = Vec::new();

    for kind in registry.kinds() {
        if filter.scope_kind.as_ref().is_some_and(|k| k != &kind) {
            continue;
        }

        let ids = resolver.visible_scope_ids(principal, &kind).await?;
        if ids.is_empty() {
            continue;
        }

        let scoped = BackupFilter {
            scope_kind: Some(kind.clone()),
            ..filter.clone()
        };
        visible.extend(
            store
                .list_backups(&scoped)
                .await?
                .into_iter()
                .filter(|b| ids.contains(&b.scope.id)),
        );
    }

    visible.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(visible)
}

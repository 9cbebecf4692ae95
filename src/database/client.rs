use deadpool_postgres::{Manager, Pool};
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};
use tracing::info;

use crate::error::{ProfilerError, Result};
use crate::profiler::{ProfileRegistry, QueryContext, QueryParam};
use crate::protocol::detect_query_type;

pub type SqlParam<'a> = &'a (dyn ToSql + Sync);

/// Pooled Postgres access that records every call into the request's profile.
///
/// Calls made for a request id with no profile in flight still run; they
/// are simply not recorded.
#[derive(Clone)]
pub struct ProfiledClient {
    pool: Pool,
    registry: ProfileRegistry,
}

impl ProfiledClient {
    pub fn new(pool: Pool, registry: ProfileRegistry) -> Self {
        Self { pool, registry }
    }

    /// Build a pool for `url` and wrap it.
    pub fn connect(url: &str, max_size: usize, registry: ProfileRegistry) -> Result<Self> {
        let config: tokio_postgres::Config = url.parse()?;
        let pool = Pool::builder(Manager::new(config, NoTls))
            .max_size(max_size)
            .build()
            .map_err(|e| ProfilerError::Database(e.to_string()))?;

        info!(max_size = max_size, "PostgreSQL pool created");
        Ok(Self::new(pool, registry))
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    pub async fn query(
        &self,
        request_id: &str,
        sql: &str,
        params: &[SqlParam<'_>],
    ) -> Result<Vec<Row>> {
        let client = self.pool.get().await?;
        let rows = self
            .registry
            .measure_query(request_id, context(sql, params), client.query(sql, params))
            .await?;
        Ok(rows)
    }

    pub async fn query_one(
        &self,
        request_id: &str,
        sql: &str,
        params: &[SqlParam<'_>],
    ) -> Result<Row> {
        let client = self.pool.get().await?;
        let row = self
            .registry
            .measure_query(request_id, context(sql, params), client.query_one(sql, params))
            .await?;
        Ok(row)
    }

    /// Returns the number of rows affected.
    pub async fn execute(
        &self,
        request_id: &str,
        sql: &str,
        params: &[SqlParam<'_>],
    ) -> Result<u64> {
        let client = self.pool.get().await?;
        let affected = self
            .registry
            .measure_query(request_id, context(sql, params), client.execute(sql, params))
            .await?;
        Ok(affected)
    }
}

fn context(sql: &str, params: &[SqlParam<'_>]) -> QueryContext {
    QueryContext::new(sql)
        .with_params(render_params(params))
        .with_label(detect_query_type(sql).label())
}

/// Bound values are only ever logged, so their `Debug` form is enough.
fn render_params(params: &[SqlParam<'_>]) -> Vec<QueryParam> {
    params
        .iter()
        .map(|p| QueryParam::String(format!("{:?}", p)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_params() {
        let id: i32 = 7;
        let name: &str = "rust";
        let missing: Option<i64> = None;

        let rendered = render_params(&[&id, &name, &missing]);
        assert_eq!(
            rendered,
            vec![
                QueryParam::String("7".to_string()),
                QueryParam::String("\"rust\"".to_string()),
                QueryParam::String("None".to_string()),
            ]
        );
    }

    #[test]
    fn test_context_carries_label() {
        let id: i32 = 1;
        let ctx = context("UPDATE courses SET title = $1", &[&id]);
        assert_eq!(ctx.label.as_deref(), Some("UPDATE"));
        assert_eq!(ctx.params.len(), 1);
    }

    #[test]
    fn test_connect_rejects_bad_url() {
        let result = ProfiledClient::connect("not a url ===", 4, ProfileRegistry::default());
        assert!(matches!(result, Err(ProfilerError::Database(_))));
    }
}

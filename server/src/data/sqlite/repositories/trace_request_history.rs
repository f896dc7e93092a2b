//! Debug request history repository

use sqlx::SqlitePool;

use crate::data::sqlite::SqliteError;

/// One replayed debug request
///
/// `query_string` and `header` hold JSON objects; times are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TraceRequestHistoryRow {
    pub scope_id: String,
    pub request_id: String,
    pub name: String,
    pub url: String,
    pub method: String,
    pub query_string: String,
    pub header: String,
    pub body: String,
    pub status: i32,
    pub response_status: i32,
    pub response_body: String,
    pub create_time: i64,
    pub update_time: i64,
}

const COLUMNS: &str = "scope_id, request_id, name, url, method, query_string, header, body, \
                       status, response_status, response_body, create_time, update_time";

/// Insert a new history row; a duplicate key is a `Conflict`
pub async fn insert_history(
    pool: &SqlitePool,
    row: &TraceRequestHistoryRow,
) -> Result<(), SqliteError> {
    sqlx::query(&format!(
        "INSERT INTO trace_request_history ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&row.scope_id)
    .bind(&row.request_id)
    .bind(&row.name)
    .bind(&row.url)
    .bind(&row.method)
    .bind(&row.query_string)
    .bind(&row.header)
    .bind(&row.body)
    .bind(row.status)
    .bind(row.response_status)
    .bind(&row.response_body)
    .bind(row.create_time)
    .bind(row.update_time)
    .execute(pool)
    .await
    .map_err(|e| {
        SqliteError::from_insert(
            e,
            format!("debug request {} already exists", row.request_id),
        )
    })?;
    Ok(())
}

pub async fn get_history(
    pool: &SqlitePool,
    scope_id: &str,
    request_id: &str,
) -> Result<Option<TraceRequestHistoryRow>, SqliteError> {
    let row = sqlx::query_as::<_, TraceRequestHistoryRow>(&format!(
        "SELECT {COLUMNS} FROM trace_request_history WHERE scope_id = ? AND request_id = ?"
    ))
    .bind(scope_id)
    .bind(request_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Persist the outcome of the replayed HTTP call
pub async fn update_response(
    pool: &SqlitePool,
    scope_id: &str,
    request_id: &str,
    response_status: i32,
    response_body: &str,
    update_time: i64,
) -> Result<bool, SqliteError> {
    let result = sqlx::query(
        "UPDATE trace_request_history SET response_status = ?, response_body = ?, update_time = ? \
         WHERE scope_id = ? AND request_id = ?",
    )
    .bind(response_status)
    .bind(response_body)
    .bind(update_time)
    .bind(scope_id)
    .bind(request_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Returns false when the row does not exist
pub async fn update_status(
    pool: &SqlitePool,
    scope_id: &str,
    request_id: &str,
    status: i32,
    update_time: i64,
) -> Result<bool, SqliteError> {
    let result = sqlx::query(
        "UPDATE trace_request_history SET status = ?, update_time = ? \
         WHERE scope_id = ? AND request_id = ?",
    )
    .bind(status)
    .bind(update_time)
    .bind(scope_id)
    .bind(request_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Newest first
pub async fn list_histories(
    pool: &SqlitePool,
    scope_id: &str,
    limit: i64,
) -> Result<Vec<TraceRequestHistoryRow>, SqliteError> {
    let rows = sqlx::query_as::<_, TraceRequestHistoryRow>(&format!(
        "SELECT {COLUMNS} FROM trace_request_history WHERE scope_id = ? \
         ORDER BY create_time DESC, request_id DESC LIMIT ?"
    ))
    .bind(scope_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count_histories(pool: &SqlitePool, scope_id: &str) -> Result<i64, SqliteError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM trace_request_history WHERE scope_id = ?")
            .bind(scope_id)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(crate::data::sqlite::schema::SCHEMA)
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    fn row(scope: &str, id: &str, created: i64) -> TraceRequestHistoryRow {
        TraceRequestHistoryRow {
            scope_id: scope.into(),
            request_id: id.into(),
            name: "no name".into(),
            url: "http://svc/api".into(),
            method: "GET".into(),
            query_string: "{}".into(),
            header: "{}".into(),
            body: String::new(),
            status: 0,
            response_status: 0,
            response_body: String::new(),
            create_time: created,
            update_time: created,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let pool = setup_test_pool().await;
        insert_history(&pool, &row("s1", "r1", 10)).await.unwrap();

        let fetched = get_history(&pool, "s1", "r1").await.unwrap().unwrap();
        assert_eq!(fetched, row("s1", "r1", 10));
        assert!(get_history(&pool, "s2", "r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let pool = setup_test_pool().await;
        insert_history(&pool, &row("s1", "r1", 10)).await.unwrap();
        let err = insert_history(&pool, &row("s1", "r1", 11)).await.unwrap_err();
        assert!(matches!(err, SqliteError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_updates() {
        let pool = setup_test_pool().await;
        insert_history(&pool, &row("s1", "r1", 10)).await.unwrap();

        assert!(update_response(&pool, "s1", "r1", 200, "ok", 20).await.unwrap());
        assert!(update_status(&pool, "s1", "r1", 1, 30).await.unwrap());
        assert!(!update_status(&pool, "s1", "missing", 1, 30).await.unwrap());

        let fetched = get_history(&pool, "s1", "r1").await.unwrap().unwrap();
        assert_eq!(fetched.response_status, 200);
        assert_eq!(fetched.response_body, "ok");
        assert_eq!(fetched.status, 1);
        assert_eq!(fetched.update_time, 30);
        assert_eq!(fetched.create_time, 10);
    }

    #[tokio::test]
    async fn test_list_newest_first_with_count() {
        let pool = setup_test_pool().await;
        for (id, t) in [("a", 1), ("b", 3), ("c", 2)] {
            insert_history(&pool, &row("s1", id, t)).await.unwrap();
        }
        insert_history(&pool, &row("s2", "z", 9)).await.unwrap();

        let rows = list_histories(&pool, "s1", 2).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(count_histories(&pool, "s1").await.unwrap(), 3);
        assert_eq!(count_histories(&pool, "none").await.unwrap(), 0);
    }
}

use mirror::{FetchError, Filter, MutationBackend, MutationError, QueryBackend, Select};
use serde_json::Value;

use super::{SupabaseClient, error_message};

/// PostgREST query parameters for a select: `select`, one `col=op.value` pair per filter,
/// `order=col.dir`, `limit`.
pub(crate) fn query_pairs(select: &Select) -> Vec<(String, String)> {
    let mut pairs = vec![("select".to_string(), select.columns.replace(' ', ""))];
    pairs.extend(select.filters.iter().map(filter_pair));
    if let Some(order) = &select.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        pairs.push(("order".to_string(), format!("{}.{direction}", order.column)));
    }
    if let Some(limit) = select.limit {
        pairs.push(("limit".to_string(), limit.to_string()));
    }
    pairs
}

pub(crate) fn filter_pair(filter: &Filter) -> (String, String) {
    (
        filter.column.clone(),
        format!("{}.{}", filter.op.as_str(), filter.value_text()),
    )
}

impl SupabaseClient {
    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url())
    }
}

impl QueryBackend for SupabaseClient {
    async fn select(&self, select: &Select) -> Result<Vec<Value>, FetchError> {
        let backend_error = |message: String| FetchError::Backend {
            table: select.table.clone(),
            message,
        };

        let response = self
            .authorize(self.http.get(self.table_url(&select.table)))
            .query(&query_pairs(select))
            .send()
            .await
            .map_err(|e| backend_error(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| backend_error(e.to_string()))?;
        if !status.is_success() {
            return Err(backend_error(error_message(status, &body)));
        }
        serde_json::from_str(&body).map_err(|source| FetchError::Decode {
            table: select.table.clone(),
            source,
        })
    }
}

impl SupabaseClient {
    async fn send_mutation(
        &self,
        table: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<(), MutationError> {
        let rejected = |message: String| MutationError::Rejected {
            table: table.to_string(),
            message,
        };
        let response = self
            .authorize(request)
            .header("Prefer", "return=minimal")
            .send()
            .await
            .map_err(|e| rejected(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(rejected(error_message(status, &body)))
    }
}

impl MutationBackend for SupabaseClient {
    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<(), MutationError> {
        let request = self.http.post(self.table_url(table)).json(&rows);
        self.send_mutation(table, request).await
    }

    async fn update(&self, table: &str, key: &Filter, patch: Value) -> Result<(), MutationError> {
        let request = self
            .http
            .patch(self.table_url(table))
            .query(&[filter_pair(key)])
            .json(&patch);
        self.send_mutation(table, request).await
    }

    async fn delete(&self, table: &str, key: &Filter) -> Result<(), MutationError> {
        let request = self
            .http
            .delete(self.table_url(table))
            .query(&[filter_pair(key)]);
        self.send_mutation(table, request).await
    }
}

#[cfg(test)]
mod tests {
    use mirror::OrderBy;

    use super::*;

    #[test]
    fn test_query_pairs() {
        let select = Select::from("happenings")
            .filter(Filter::eq("region", "Santa Ana"))
            .filter(Filter::gte("created_at", "2024-11-01T00:00:00+00:00"))
            .order(OrderBy::desc("created_at"))
            .limit(20);
        let pairs = query_pairs(&select);
        let pairs: Vec<(&str, &str)> = pairs
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("select", "*"),
                ("region", "eq.Santa Ana"),
                ("created_at", "gte.2024-11-01T00:00:00+00:00"),
                ("order", "created_at.desc"),
                ("limit", "20"),
            ]
        );
    }

    #[test]
    fn test_columns_and_numeric_keys() {
        let pairs = query_pairs(&Select::from("users").columns("id, role"));
        assert_eq!(pairs[0], ("select".to_string(), "id,role".to_string()));
        assert_eq!(
            filter_pair(&Filter::eq("id", 42)),
            ("id".to_string(), "eq.42".to_string())
        );
    }
}

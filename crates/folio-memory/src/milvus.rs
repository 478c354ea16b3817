use crate::index::{
    rank_hits, CollectionSchema, FieldSchema, FieldType, IndexSpec, Payload, Record, SearchHit,
    SearchRequest, VectorIndex, ID_FIELD, VECTOR_FIELD,
};
use async_trait::async_trait;
use folio_core::{FolioError, FolioResult};
use serde_json::{json, Value};
use tracing::{debug, info};

/// Vector index backed by a Milvus (or Zilliz Cloud) server via its v2 REST API.
pub struct MilvusVectorIndex {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl MilvusVectorIndex {
    /// Connect to the server at `uri`, authenticating with `token` when set.
    pub fn new(http: reqwest::Client, uri: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: uri.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            http,
        }
    }

    async fn post(&self, path: &str, body: Value) -> FolioResult<Value> {
        let url = format!("{}/v2/vectordb/{path}", self.base_url);
        let mut request = self.http.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| FolioError::Http(e.to_string()))?;

        let status = resp.status();
        let resp_body: Value = resp
            .json()
            .await
            .map_err(|e| FolioError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(FolioError::VectorIndex(format!(
                "Milvus HTTP {status} on {path}: {resp_body}"
            )));
        }

        let code = resp_body["code"].as_i64().unwrap_or(0);
        if code != 0 {
            let message = resp_body["message"].as_str().unwrap_or("unknown error");
            return Err(FolioError::VectorIndex(format!(
                "Milvus error {code} on {path}: {message}"
            )));
        }
        Ok(resp_body)
    }

    async fn has_collection(&self, collection: &str) -> FolioResult<bool> {
        let resp = self
            .post("collections/has", json!({ "collectionName": collection }))
            .await?;
        Ok(resp["data"]["has"].as_bool().unwrap_or(false))
    }
}

fn field_to_json(field: &FieldSchema) -> Value {
    match field.field_type {
        FieldType::Int64 => json!({
            "fieldName": field.name,
            "dataType": "Int64",
            "isPrimary": field.is_primary,
        }),
        FieldType::VarChar { max_length } => json!({
            "fieldName": field.name,
            "dataType": "VarChar",
            "elementTypeParams": { "max_length": max_length },
        }),
        FieldType::FloatVector { dim } => json!({
            "fieldName": field.name,
            "dataType": "FloatVector",
            "elementTypeParams": { "dim": dim },
        }),
    }
}

fn field_param(field: &Value, key: &str) -> Option<usize> {
    field["params"]
        .as_array()?
        .iter()
        .find(|p| p["key"].as_str() == Some(key))
        .and_then(|p| match &p["value"] {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_u64().map(|n| n as usize),
            _ => None,
        })
}

fn field_from_json(field: &Value) -> Option<FieldSchema> {
    let name = field["name"].as_str()?.to_string();
    let field_type = match field["type"].as_str()? {
        "Int64" => FieldType::Int64,
        "VarChar" => FieldType::VarChar {
            max_length: field_param(field, "max_length")?,
        },
        "FloatVector" => FieldType::FloatVector {
            dim: field_param(field, "dim")?,
        },
        _ => return None,
    };
    Some(FieldSchema {
        name,
        field_type,
        is_primary: field["primaryKey"].as_bool().unwrap_or(false),
        auto_id: field["autoId"].as_bool().unwrap_or(false),
    })
}

fn hit_from_json(row: &Value) -> Option<SearchHit> {
    let obj = row.as_object()?;
    let id = match obj.get(ID_FIELD)? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    let score = obj.get("distance")?.as_f64()? as f32;
    let payload: Payload = obj
        .iter()
        .filter(|(k, _)| k.as_str() != ID_FIELD && k.as_str() != "distance")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Some(SearchHit { id, score, payload })
}

#[async_trait]
impl VectorIndex for MilvusVectorIndex {
    async fn ensure_collection(
        &self,
        schema: &CollectionSchema,
        index: &IndexSpec,
    ) -> FolioResult<()> {
        if !self.has_collection(&schema.name).await? {
            let auto_id = schema.fields.iter().any(|f| f.is_primary && f.auto_id);
            let fields: Vec<Value> = schema.fields.iter().map(field_to_json).collect();
            self.post(
                "collections/create",
                json!({
                    "collectionName": schema.name,
                    "description": schema.description,
                    "schema": {
                        "autoId": auto_id,
                        "enableDynamicField": false,
                        "fields": fields,
                    },
                    "indexParams": [{
                        "fieldName": index.field,
                        "indexName": index.field,
                        "metricType": index.metric.as_str(),
                        "indexType": index.index_type,
                    }],
                }),
            )
            .await?;
            info!(collection = %schema.name, "Created collection");
        }

        self.post("collections/load", json!({ "collectionName": schema.name }))
            .await?;
        Ok(())
    }

    async fn describe(&self, collection: &str) -> FolioResult<Option<CollectionSchema>> {
        if !self.has_collection(collection).await? {
            return Ok(None);
        }
        let resp = self
            .post("collections/describe", json!({ "collectionName": collection }))
            .await?;
        let data = &resp["data"];
        let fields = data["fields"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(field_from_json)
            .collect();
        Ok(Some(CollectionSchema {
            name: collection.to_string(),
            description: data["description"].as_str().unwrap_or_default().to_string(),
            fields,
        }))
    }

    async fn search(
        &self,
        collection: &str,
        request: &SearchRequest,
    ) -> FolioResult<Vec<SearchHit>> {
        let mut body = json!({
            "collectionName": collection,
            "data": [request.vector],
            "annsField": VECTOR_FIELD,
            "limit": request.limit,
            "outputFields": request.output_fields,
            "searchParams": { "metricType": "COSINE" },
        });
        if let Some(filter) = &request.filter {
            body["filter"] = Value::String(filter.to_expr());
        }

        let resp = self.post("entities/search", body).await?;
        let mut hits: Vec<SearchHit> = resp["data"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(hit_from_json)
            .collect();
        debug!(collection, hits = hits.len(), "Milvus search");

        rank_hits(&mut hits, request.limit);
        Ok(hits)
    }

    async fn insert(&self, collection: &str, records: Vec<Record>) -> FolioResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let rows: Vec<Value> = records
            .into_iter()
            .map(|record| {
                let mut row = record.payload;
                row.insert(VECTOR_FIELD.to_string(), json!(record.vector));
                Value::Object(row)
            })
            .collect();
        let expected = rows.len();

        let resp = self
            .post(
                "entities/insert",
                json!({ "collectionName": collection, "data": rows }),
            )
            .await?;
        Ok(resp["data"]["insertCount"]
            .as_u64()
            .map_or(expected, |n| n as usize))
    }

    async fn count(&self, collection: &str) -> FolioResult<usize> {
        let resp = self
            .post("collections/get_stats", json!({ "collectionName": collection }))
            .await?;
        Ok(resp["data"]["rowCount"].as_u64().unwrap_or(0) as usize)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::index::Filter;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn index(server: &MockServer) -> MilvusVectorIndex {
        MilvusVectorIndex::new(reqwest::Client::new(), server.uri(), Some("tok".into()))
    }

    fn schema() -> CollectionSchema {
        CollectionSchema::new("semantic_cache", "cache")
            .field(FieldSchema::primary_key())
            .field(FieldSchema::vector(2))
            .field(FieldSchema::varchar("question", 1000))
    }

    #[tokio::test]
    async fn test_ensure_collection_creates_when_missing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/has"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {"has": false}})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/create"))
            .and(body_partial_json(json!({
                "collectionName": "semantic_cache",
                "indexParams": [{"metricType": "COSINE", "indexType": "AUTOINDEX"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {}})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/load"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {}})))
            .expect(1)
            .mount(&server)
            .await;

        index(&server)
            .ensure_collection(&schema(), &IndexSpec::cosine_autoindex())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ensure_collection_skips_create_when_present() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/has"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {"has": true}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/load"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
            .mount(&server)
            .await;

        index(&server)
            .ensure_collection(&schema(), &IndexSpec::cosine_autoindex())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_search_sends_filter_and_parses_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/search"))
            .and(body_partial_json(json!({
                "collectionName": "conversation_memory",
                "filter": "session_id == \"s1\"",
                "limit": 3
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": [
                    {"id": 7, "distance": 0.5, "summary": "older"},
                    {"id": "9", "distance": 0.9, "summary": "best"}
                ]
            })))
            .mount(&server)
            .await;

        let request = SearchRequest::new(vec![0.1, 0.2], 3)
            .with_filter(Filter::eq("session_id", "s1"))
            .with_output_fields(&["summary"]);
        let hits = index(&server)
            .search("conversation_memory", &request)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 9);
        assert_eq!(hits[0].str_field("summary"), Some("best"));
        assert!(hits[0].payload.get("distance").is_none());
    }

    #[tokio::test]
    async fn test_nonzero_code_is_index_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/insert"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 1100,
                "message": "field question exceeds max length"
            })))
            .mount(&server)
            .await;

        let record = Record::new(vec![0.1, 0.2], Payload::new());
        let err = index(&server)
            .insert("semantic_cache", vec![record])
            .await
            .unwrap_err();
        assert!(matches!(err, FolioError::VectorIndex(_)));
        assert!(err.to_string().contains("exceeds max length"));
    }

    #[tokio::test]
    async fn test_insert_and_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/insert"))
            .and(body_partial_json(json!({"data": [{"question": "q", "vector": [0.5, 0.5]}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": {"insertCount": 1, "insertIds": [42]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/get_stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": {"rowCount": 12}
            })))
            .mount(&server)
            .await;

        let idx = index(&server);
        let mut payload = Payload::new();
        payload.insert("question".into(), json!("q"));
        let n = idx
            .insert("semantic_cache", vec![Record::new(vec![0.5, 0.5], payload)])
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(idx.count("semantic_cache").await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_describe_parses_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/has"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {"has": true}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/describe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": {
                    "collectionName": "semantic_cache",
                    "description": "cache",
                    "fields": [
                        {"name": "id", "type": "Int64", "primaryKey": true, "autoId": true},
                        {"name": "vector", "type": "FloatVector",
                         "params": [{"key": "dim", "value": "2"}]},
                        {"name": "question", "type": "VarChar",
                         "params": [{"key": "max_length", "value": "1000"}]}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let described = index(&server).describe("semantic_cache").await.unwrap();
        assert_eq!(described, Some(schema()));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let idx = MilvusVectorIndex::new(reqwest::Client::new(), "http://127.0.0.1:1", None);
        let err = idx.count("semantic_cache").await.unwrap_err();
        assert!(err.is_unavailable());
    }
}

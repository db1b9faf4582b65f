//! Rectangle query request construction and the HTTP client that sends it.

use std::sync::Arc;

use parcel_core::{QueryRectangle, EPSG_CODE};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use url::Url;

use crate::config::{ClientConfig, ConfigError};
use crate::error::QueryError;
use crate::retry::retry_with_backoff;

const POINT_CLASS_NAME: &str = "SuperMap.Geometry.Point";

// -- Request body types -------------------------------------------------------

/// Coordinate system marker attached to the query and its geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrjCoordSys {
    pub epsg_code: u32,
}

/// One named layer with its attribute filter and requested fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerQuery {
    pub name: String,
    pub attribute_filter: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParameters {
    pub prj_coord_sys: PrjCoordSys,
    pub expect_count: u32,
    pub query_params: Vec<LayerQuery>,
    pub start_record: u32,
}

/// A boundary vertex in the service's point object form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundaryPoint {
    #[serde(rename = "CLASS_NAME")]
    pub class_name: &'static str,
    pub id: String,
    pub bounds: Option<Value>,
    #[serde(rename = "SRID")]
    pub srid: Option<u32>,
    pub x: f64,
    pub y: f64,
    pub tag: Option<Value>,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "geometryType")]
    pub geometry_type: &'static str,
}

/// The query region: a single closed ring.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionGeometry {
    pub id: Option<Value>,
    pub style: Option<Value>,
    pub parts: Vec<usize>,
    pub points: Vec<BoundaryPoint>,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub prj_coord_sys: PrjCoordSys,
}

/// Body of a spatial intersect query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query_mode: &'static str,
    pub query_parameters: QueryParameters,
    pub geometry: RegionGeometry,
    pub spatial_query_mode: &'static str,
}

/// Build the query body for `rect` against the configured layer.
///
/// The region is the five-point closed ring from
/// [`QueryRectangle::boundary_ring`], with point ids `SuperMap.Geometry_1`
/// through `SuperMap.Geometry_5`.
pub fn build_query(config: &ClientConfig, rect: &QueryRectangle) -> QueryRequest {
    let crs = PrjCoordSys {
        epsg_code: EPSG_CODE,
    };
    let ring = rect.boundary_ring();
    let points = ring
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| BoundaryPoint {
            class_name: POINT_CLASS_NAME,
            id: format!("SuperMap.Geometry_{}", i + 1),
            bounds: None,
            srid: None,
            x,
            y,
            tag: None,
            kind: "Point",
            geometry_type: "Point",
        })
        .collect();

    QueryRequest {
        query_mode: "SpatialQuery",
        query_parameters: QueryParameters {
            prj_coord_sys: crs,
            expect_count: rect.expected_count,
            query_params: vec![LayerQuery {
                name: config.layer_name.clone(),
                attribute_filter: config.attribute_filter.clone(),
                fields: config.fields.clone(),
            }],
            start_record: 0,
        },
        geometry: RegionGeometry {
            id: None,
            style: None,
            parts: vec![ring.len()],
            points,
            kind: "REGION",
            prj_coord_sys: crs,
        },
        spatial_query_mode: "INTERSECT",
    }
}

/// Pull the encrypted payload out of a decoded response body.
///
/// A missing or non-string `data` member yields an empty payload. A body
/// carrying `"succeed": false` or a non-null `error` member is a
/// [`QueryError::Service`].
pub fn extract_payload(endpoint: &str, body: &Value) -> Result<String, QueryError> {
    let obj = body.as_object().ok_or_else(|| QueryError::Decode {
        endpoint: endpoint.to_string(),
        reason: "response body is not a JSON object".into(),
    })?;

    let failed = obj.get("succeed").and_then(Value::as_bool) == Some(false);
    let error = obj.get("error").filter(|e| !e.is_null());
    if failed || error.is_some() {
        return Err(QueryError::Service {
            endpoint: endpoint.to_string(),
            message: service_message(error),
        });
    }

    Ok(obj
        .get("data")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

fn service_message(error: Option<&Value>) -> String {
    match error {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(o)) => o
            .get("errorMsg")
            .or_else(|| o.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(o.clone()).to_string()),
        Some(other) => other.to_string(),
        None => "service reported failure".into(),
    }
}

// -- Client -------------------------------------------------------------------

/// HTTP client for rectangle queries.
///
/// Cloning is cheap: clones share the connection pool and the in-flight
/// request bound.
#[derive(Debug, Clone)]
pub struct QueryClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    permits: Arc<Semaphore>,
    endpoint: String,
}

impl QueryClient {
    pub fn new(config: ClientConfig) -> Result<Self, QueryError> {
        config.validate()?;

        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.max_idle_connections)
            .user_agent(config.user_agent.clone());
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(proxy.to_proxy()?);
        }
        let http = builder
            .build()
            .map_err(|e| ConfigError::ClientBuild(e.to_string()))?;

        let endpoint = format!("POST {}", config.api_url.path());
        let permits = Arc::new(Semaphore::new(config.max_connections));
        Ok(Self {
            http,
            config: Arc::new(config),
            permits,
            endpoint,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Query one rectangle and return its raw encrypted payload.
    ///
    /// An empty string means the service returned no `data`.
    pub async fn fetch(&self, rect: &QueryRectangle) -> Result<String, QueryError> {
        let body = build_query(&self.config, rect);
        let url = self.request_url();
        let (body, url) = (&body, &url);
        retry_with_backoff(&self.config.retry, QueryError::is_retryable, move |attempt| {
            tracing::debug!(rectangle = %rect, attempt, "sending rectangle query");
            self.send_once(url.clone(), body)
        })
        .await
    }

    fn request_url(&self) -> Url {
        let mut url = self.config.api_url.clone();
        url.query_pairs_mut()
            .append_pair("returnContent", "true")
            .append_pair("token", &self.config.api_token);
        url
    }

    async fn send_once(&self, url: Url, body: &QueryRequest) -> Result<String, QueryError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| QueryError::PoolClosed)?;

        // Strip the URL from transport errors; it carries the token.
        let transport = |e: reqwest::Error| QueryError::Transport {
            endpoint: self.endpoint.clone(),
            source: e.without_url(),
        };

        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(QueryError::Status {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await.map_err(transport)?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| QueryError::Decode {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })?;
        extract_payload(&self.endpoint, &value)
    }
}

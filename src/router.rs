use std::{fmt, path::PathBuf, sync::Arc};

use bytes::Bytes;
use http_body_util::{BodyExt as _, Full, LengthLimitError, Limited};
use hyper::{
    HeaderMap, Method, Request, Response, StatusCode,
    body::Body,
    header::{self, HeaderValue},
};
use serde::Serialize;
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;

use crate::{
    config::ServerConfig,
    form::{BodyFormat, FormError, SubmittedFields},
    refid::RefId,
    storage::RecordStore,
};

pub const CLEAR_TOKEN_HEADER: &str = "x-intake-clear-token";
const ACTION_PARAM: &str = "action";
const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

/// Operation selected by the `action` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Submit,
    Fetch,
    Clear,
}

impl Action {
    /// `submit` must be a POST; `fetch` and `clear` must be GETs. Anything
    /// else is not an API call.
    pub fn classify(method: &Method, query: Option<&str>) -> Option<Self> {
        let action = url::form_urlencoded::parse(query?.as_bytes())
            .filter(|(key, _)| key == ACTION_PARAM)
            .map(|(_, value)| value)
            .last()?;

        match (&*action, method) {
            ("submit", &Method::POST) => Some(Self::Submit),
            ("fetch", &Method::GET) => Some(Self::Fetch),
            ("clear", &Method::GET) => Some(Self::Clear),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Fetch => "fetch",
            Self::Clear => "clear",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearDenied(pub String);

impl fmt::Display for ClearDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ClearDenied {}

/// Consulted before every clear-all. Deployments that need access control
/// plug their policy in here.
pub trait ClearPolicy: Send + Sync + fmt::Debug {
    fn authorize(&self, headers: &HeaderMap) -> Result<(), ClearDenied>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ClearPolicy for AllowAll {
    fn authorize(&self, _headers: &HeaderMap) -> Result<(), ClearDenied> {
        Ok(())
    }
}

/// Requires `x-intake-clear-token` to equal the configured token.
#[derive(Debug, Clone)]
pub struct TokenClearPolicy {
    token: String,
}

impl TokenClearPolicy {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl ClearPolicy for TokenClearPolicy {
    fn authorize(&self, headers: &HeaderMap) -> Result<(), ClearDenied> {
        let authorized = headers
            .get(CLEAR_TOKEN_HEADER)
            .is_some_and(|provided| token_matches(self.token.as_bytes(), provided.as_bytes()));
        if authorized {
            Ok(())
        } else {
            Err(ClearDenied(format!(
                "missing or invalid `{CLEAR_TOKEN_HEADER}` header for clear"
            )))
        }
    }
}

/// Constant time in the token contents; only the length can leak.
fn token_matches(expected: &[u8], provided: &[u8]) -> bool {
    bool::from(expected.ct_eq(provided))
}

#[derive(Debug, Serialize)]
struct SubmitAccepted<'a> {
    success: bool,
    #[serde(rename = "refId")]
    ref_id: &'a RefId,
    date: String,
    data: &'a Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct Failure {
    success: bool,
    error: String,
}

#[derive(Debug, Serialize)]
struct Acknowledged {
    success: bool,
}

/// Maps requests on the single endpoint to record operations.
#[derive(Debug, Clone)]
pub struct RequestRouter {
    store: RecordStore,
    clear_policy: Arc<dyn ClearPolicy>,
    max_body_bytes: usize,
    index_file: Option<PathBuf>,
}

impl RequestRouter {
    pub fn new(store: RecordStore) -> Self {
        Self {
            store,
            clear_policy: Arc::new(AllowAll),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            index_file: None,
        }
    }

    pub fn from_config(config: &ServerConfig, store: RecordStore) -> Self {
        let router = Self::new(store)
            .with_max_body_bytes(config.max_body_bytes)
            .with_index_file(config.index_file.clone());
        match config.clear_token.as_deref() {
            Some(token) => router.with_clear_policy(Arc::new(TokenClearPolicy::new(token))),
            None => router,
        }
    }

    pub fn with_clear_policy(mut self, clear_policy: Arc<dyn ClearPolicy>) -> Self {
        self.clear_policy = clear_policy;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn with_index_file(mut self, index_file: Option<PathBuf>) -> Self {
        self.index_file = index_file;
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let Some(action) = Action::classify(req.method(), req.uri().query()) else {
            return self.static_surface().await;
        };
        tracing::debug!(action = action.as_str(), "api request");

        match action {
            Action::Submit => self.submit(req).await,
            Action::Fetch => self.fetch().await,
            Action::Clear => self.clear(req.headers()).await,
        }
    }

    async fn submit<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let fields = match self.read_submission(req).await {
            Ok(fields) => fields,
            Err(err) => {
                tracing::info!("rejected submission: {err}");
                return failure_response(status_for_form_error(&err), err.to_string());
            }
        };
        let application = match fields.to_application() {
            Ok(application) => application,
            Err(err) => {
                tracing::info!("rejected submission: {err}");
                return failure_response(status_for_form_error(&err), err.to_string());
            }
        };

        match self.store.insert(application).await {
            Ok(record) => json_response(
                StatusCode::OK,
                &SubmitAccepted {
                    success: true,
                    ref_id: &record.ref_id,
                    date: record.receipt_date(),
                    data: fields.echo(),
                },
            ),
            Err(err) => {
                tracing::warn!("insert application failed: {err}");
                failure_response(StatusCode::OK, err.to_string())
            }
        }
    }

    async fn read_submission<B>(&self, req: Request<B>) -> Result<SubmittedFields, FormError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|value| {
                value
                    .to_str()
                    .map_err(|_| FormError::UnsupportedContentType("<non-ascii>".to_owned()))
            })
            .transpose()?;
        let format = BodyFormat::from_content_type(content_type)?;

        let body = Limited::new(req.into_body(), self.max_body_bytes)
            .collect()
            .await
            .map_err(|err| {
                if err.downcast_ref::<LengthLimitError>().is_some() {
                    FormError::BodyTooLarge(self.max_body_bytes)
                } else {
                    FormError::InvalidBody(format!("failed to read request body: {err}"))
                }
            })?
            .to_bytes();

        SubmittedFields::parse(format, &body)
    }

    async fn fetch(&self) -> Response<Full<Bytes>> {
        match self.store.list_all().await {
            Ok(records) => json_response(StatusCode::OK, &records),
            Err(err) => {
                tracing::warn!("list applications failed: {err}");
                failure_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }

    async fn clear(&self, headers: &HeaderMap) -> Response<Full<Bytes>> {
        if let Err(denied) = self.clear_policy.authorize(headers) {
            tracing::warn!("clear denied: {denied}");
            return failure_response(StatusCode::UNAUTHORIZED, denied.to_string());
        }

        match self.store.clear_all().await {
            Ok(_) => json_response(StatusCode::OK, &Acknowledged { success: true }),
            Err(err) => {
                tracing::warn!("clear applications failed: {err}");
                failure_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }

    async fn static_surface(&self) -> Response<Full<Bytes>> {
        let Some(index_file) = self.index_file.as_ref() else {
            return simple_response(StatusCode::NOT_FOUND, "not found");
        };

        match tokio::fs::read(index_file).await {
            Ok(page) => {
                let mut response = Response::new(Full::new(Bytes::from(page)));
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/html; charset=utf-8"),
                );
                response
            }
            Err(err) => {
                tracing::warn!("read index file {}: {err}", index_file.display());
                simple_response(StatusCode::NOT_FOUND, "not found")
            }
        }
    }
}

fn status_for_form_error(err: &FormError) -> StatusCode {
    match err {
        FormError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        FormError::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        FormError::MissingField(_) | FormError::InvalidDate(_) | FormError::InvalidBody(_) => {
            StatusCode::BAD_REQUEST
        }
    }
}

fn simple_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_owned())));
    *response.status_mut() = status;
    response
}

fn failure_response(status: StatusCode, message: impl Into<String>) -> Response<Full<Bytes>> {
    json_response(
        status,
        &Failure {
            success: false,
            error: message.into(),
        },
    )
}

fn json_response<T: Serialize + ?Sized>(status: StatusCode, payload: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(payload) {
        Ok(body) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            *response.status_mut() = status;
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(err) => {
            tracing::debug!("failed to serialize JSON response: {err}");
            simple_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to serialize response",
            )
        }
    }
}

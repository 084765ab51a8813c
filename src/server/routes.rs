//! HTTP route handlers for the chat API.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{FromRequestParts, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::chat::controller::{ConversationView, SessionPhase, SubmitOutcome};
use crate::chat::core::errors::ChatError;
use crate::chat::core::ids::OwnerId;
use crate::chat::core::message::Message;

use super::state::AppState;

/// Header carrying the authenticated owner id.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Longest wait for a session to become ready or an answer to show up.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/messages", get(list_messages).post(submit_message))
        .route("/api/messages/stream", get(stream_messages))
        .route("/api/draft", put(update_draft))
        .route("/api/session", delete(end_session))
        .route("/api/credential", put(save_credential).delete(clear_credential))
        .with_state(state)
}

/// Error returned by handlers.
#[derive(Debug)]
pub enum ApiError {
    /// No owner header on the request.
    Unauthenticated,
    /// Owner header present but invalid.
    BadOwner(String),
    /// Chat layer failure.
    Chat(ChatError),
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self::Chat(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                format!("missing {OWNER_HEADER} header"),
            ),
            Self::BadOwner(reason) => (StatusCode::BAD_REQUEST, reason),
            Self::Chat(err @ (ChatError::InvalidConfig(_) | ChatError::InvalidMessage(_))) => {
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            Self::Chat(err) => {
                warn!(%err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Owner taken from the identity header.
#[derive(Debug, Clone)]
pub struct Owner(pub OwnerId);

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(OWNER_HEADER)
            .ok_or(ApiError::Unauthenticated)?
            .to_str()
            .map_err(|_| ApiError::BadOwner(format!("{OWNER_HEADER} must be visible ASCII")))?;
        OwnerId::new(raw)
            .map(Self)
            .map_err(|err| ApiError::BadOwner(err.to_string()))
    }
}

/// Conversation state as rendered by clients.
#[derive(Debug, Serialize)]
pub struct ViewResponse {
    /// Session owner.
    pub owner: Option<OwnerId>,
    /// Session phase.
    pub phase: SessionPhase,
    /// Subscription is live.
    pub ready: bool,
    /// A question is awaiting its answer.
    pub loading: bool,
    /// Pending input buffer.
    pub draft: String,
    /// Persisted messages with local notices, in display order.
    pub messages: Vec<Message>,
}

impl ViewResponse {
    /// Render `view`, keeping only notices raised since serial `since`.
    ///
    /// Notices belong to the request or stream that saw them happen; a
    /// later load shows persisted messages only.
    #[must_use]
    pub fn scoped(view: &ConversationView, since: u64) -> Self {
        Self {
            owner: view.owner.clone(),
            phase: view.phase,
            ready: view.is_ready(),
            loading: view.is_loading(),
            draft: view.draft.clone(),
            messages: view.rendered_since(since).into_iter().cloned().collect(),
        }
    }
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "askbox",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Current conversation for the caller.
async fn list_messages(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
) -> Json<ViewResponse> {
    let controller = state.session(&owner).await;
    let view = controller
        .settle(SETTLE_TIMEOUT, ConversationView::is_ready)
        .await;
    Json(ViewResponse::scoped(&view, view.notice_serial))
}

/// Submit request.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    /// Question text.
    pub text: String,
}

/// Submit response.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    /// What the controller did.
    pub outcome: SubmitOutcome,
    /// Conversation after the submit.
    pub view: ViewResponse,
}

/// Ask a question.
async fn submit_message(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Json(request): Json<SubmitRequest>,
) -> Json<SubmitResponse> {
    let controller = state.session(&owner).await;
    let since = controller.notice_serial();
    let outcome = controller.submit(&owner, &request.text).await;
    let view = match &outcome {
        SubmitOutcome::Answered { answer_id, .. } => {
            let answer_id = *answer_id;
            controller
                .settle(SETTLE_TIMEOUT, |v| {
                    v.messages.iter().any(|m| m.id == answer_id)
                })
                .await
        }
        SubmitOutcome::Failed {
            question_id: Some(question_id),
            ..
        } => {
            let question_id = *question_id;
            controller
                .settle(SETTLE_TIMEOUT, |v| {
                    v.messages.iter().any(|m| m.id == question_id)
                })
                .await
        }
        SubmitOutcome::Failed { .. } | SubmitOutcome::Ignored { .. } => controller.view(),
    };
    Json(SubmitResponse {
        outcome,
        view: ViewResponse::scoped(&view, since),
    })
}

/// Server-sent events: one `view` event now and after every change.
///
/// Notices raised while the stream is open are included.
async fn stream_messages(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let controller = state.session(&owner).await;
    let rx = controller.watch();
    let since = rx.borrow().notice_serial;
    let stream = futures::stream::unfold((rx, true), move |(mut rx, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let payload = ViewResponse::scoped(&rx.borrow_and_update(), since);
        let event = Event::default().event("view").json_data(payload);
        Some((event, (rx, false)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Draft update request.
#[derive(Debug, Deserialize)]
pub struct DraftRequest {
    /// Pending input text.
    pub text: String,
}

/// Replace the pending input buffer.
async fn update_draft(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Json(request): Json<DraftRequest>,
) -> StatusCode {
    state.session(&owner).await.set_draft(request.text);
    StatusCode::NO_CONTENT
}

/// Identity went away: drop the caller's session.
async fn end_session(State(state): State<Arc<AppState>>, Owner(owner): Owner) -> StatusCode {
    if state.end_session(&owner).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// API key update request.
#[derive(Debug, Deserialize)]
pub struct CredentialRequest {
    /// Completion service API key.
    pub api_key: String,
}

/// Store the completion API key.
async fn save_credential(
    State(state): State<Arc<AppState>>,
    Owner(_): Owner,
    Json(request): Json<CredentialRequest>,
) -> Result<StatusCode, ApiError> {
    state.credentials.save_api_key(&request.api_key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Forget the completion API key.
async fn clear_credential(
    State(state): State<Arc<AppState>>,
    Owner(_): Owner,
) -> Result<StatusCode, ApiError> {
    state.credentials.clear_api_key().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, header};
    use futures::StreamExt;
    use tokio_rusqlite::Connection;
    use tower::ServiceExt;

    use super::*;
    use crate::chat::core::config::ChatConfig;
    use crate::chat::core::errors::ChatResult;
    use crate::chat::core::message::MessageRole;
    use crate::llm::completion::{CompletionClient, CompletionFuture, StaticResolver};

    struct Canned;

    impl CompletionClient for Canned {
        fn generate(&self, _prompt: &str) -> CompletionFuture<'_, ChatResult<String>> {
            Box::pin(async { Ok("Recursion is...".to_string()) })
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    async fn state_with(resolver_client: Option<Arc<dyn CompletionClient>>) -> Arc<AppState> {
        let conn = Arc::new(Connection::open_in_memory().await.expect("db"));
        let state = AppState::with_connection(ChatConfig::default(), conn)
            .await
            .expect("state");
        match resolver_client {
            Some(client) => AppState::new(
                state.config.clone(),
                Arc::clone(&state.store),
                Arc::clone(&state.credentials),
                Arc::new(StaticResolver::new(client)),
            ),
            None => state,
        }
    }

    fn request(
        method: &str,
        uri: &str,
        owner: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(owner) = owner {
            builder = builder.header(OWNER_HEADER, owner);
        }
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        }
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(state_with(None).await);
        let response = app
            .oneshot(request("GET", "/health", None, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["service"], "askbox");
    }

    #[tokio::test]
    async fn test_owner_header_required_and_validated() {
        let app = create_router(state_with(None).await);
        let missing = app
            .clone()
            .oneshot(request("GET", "/api/messages", None, None))
            .await
            .expect("response");
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let invalid = app
            .oneshot(request("GET", "/api/messages", Some("has space"), None))
            .await
            .expect("response");
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_then_submit_round_trip() {
        let state = state_with(Some(Arc::new(Canned))).await;
        let app = create_router(Arc::clone(&state));

        let listed = app
            .clone()
            .oneshot(request("GET", "/api/messages", Some("U1"), None))
            .await
            .expect("response");
        assert_eq!(listed.status(), StatusCode::OK);
        let listed = json_body(listed).await;
        assert_eq!(listed["ready"], true);
        assert_eq!(listed["messages"].as_array().map(Vec::len), Some(1));
        assert_eq!(listed["messages"][0]["is_welcome_message"], true);

        let submitted = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/messages",
                Some("U1"),
                Some(serde_json::json!({ "text": "What is recursion?" })),
            ))
            .await
            .expect("response");
        let submitted = json_body(submitted).await;
        assert_eq!(submitted["outcome"]["status"], "answered");
        let messages = submitted["view"]["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["role"], MessageRole::User.as_str());
        assert_eq!(messages[2]["text"], "Recursion is...");
        assert_eq!(messages[2]["reply_to"], submitted["outcome"]["question_id"]);
        assert_eq!(submitted["view"]["loading"], false);

        let blank = app
            .oneshot(request(
                "POST",
                "/api/messages",
                Some("U1"),
                Some(serde_json::json!({ "text": "  " })),
            ))
            .await
            .expect("response");
        let blank = json_body(blank).await;
        assert_eq!(blank["outcome"]["status"], "ignored");
        assert_eq!(blank["outcome"]["reason"], "empty_text");
        assert_eq!(state.session_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_key_then_saved_key() {
        let state = state_with(None).await;
        let app = create_router(Arc::clone(&state));

        let failed = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/messages",
                Some("U2"),
                Some(serde_json::json!({ "text": "hello" })),
            ))
            .await
            .expect("response");
        let failed = json_body(failed).await;
        assert_eq!(failed["outcome"]["status"], "failed");
        assert_eq!(
            failed["outcome"]["notice"],
            "Error: API key not found. Please set it."
        );

        let blank = app
            .clone()
            .oneshot(request(
                "PUT",
                "/api/credential",
                Some("U2"),
                Some(serde_json::json!({ "api_key": " " })),
            ))
            .await
            .expect("response");
        assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

        let saved = app
            .clone()
            .oneshot(request(
                "PUT",
                "/api/credential",
                Some("U2"),
                Some(serde_json::json!({ "api_key": "secret" })),
            ))
            .await
            .expect("response");
        assert_eq!(saved.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            state.credentials.load_api_key().await.expect("load").as_deref(),
            Some("secret")
        );

        let cleared = app
            .oneshot(request("DELETE", "/api/credential", Some("U2"), None))
            .await
            .expect("response");
        assert_eq!(cleared.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.credentials.load_api_key().await.expect("load"), None);
    }

    #[tokio::test]
    async fn test_draft_and_session_end() {
        let state = state_with(None).await;
        let app = create_router(Arc::clone(&state));

        let drafted = app
            .clone()
            .oneshot(request(
                "PUT",
                "/api/draft",
                Some("U3"),
                Some(serde_json::json!({ "text": "half a thought" })),
            ))
            .await
            .expect("response");
        assert_eq!(drafted.status(), StatusCode::NO_CONTENT);

        let listed = app
            .clone()
            .oneshot(request("GET", "/api/messages", Some("U3"), None))
            .await
            .expect("response");
        assert_eq!(json_body(listed).await["draft"], "half a thought");

        let ended = app
            .clone()
            .oneshot(request("DELETE", "/api/session", Some("U3"), None))
            .await
            .expect("response");
        assert_eq!(ended.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.session_count(), 0);

        let again = app
            .oneshot(request("DELETE", "/api/session", Some("U3"), None))
            .await
            .expect("response");
        assert_eq!(again.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stream_emits_view_event() {
        let app = create_router(state_with(None).await);
        let response = app
            .oneshot(request("GET", "/api/messages/stream", Some("U4"), None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );

        let mut chunks = response.into_body().into_data_stream();
        let first = tokio::time::timeout(Duration::from_secs(5), chunks.next())
            .await
            .expect("event in time")
            .expect("stream open")
            .expect("chunk");
        let text = String::from_utf8_lossy(&first);
        assert!(text.starts_with("event: view"));
        assert!(text.contains("\"owner\":\"U4\""));
    }

    fn texts(view: &serde_json::Value) -> Vec<String> {
        view["messages"]
            .as_array()
            .expect("messages")
            .iter()
            .map(|m| m["text"].as_str().expect("text").to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_reload_after_failure_shows_persisted_messages_only() {
        let state = state_with(None).await;
        let app = create_router(Arc::clone(&state));
        let welcome = state.config.conversation.welcome_text.clone();

        let first = app
            .clone()
            .oneshot(request("GET", "/api/messages", Some("U9"), None))
            .await
            .expect("response");
        assert_eq!(texts(&json_body(first).await), [welcome.clone()]);

        let failed = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/messages",
                Some("U9"),
                Some(serde_json::json!({ "text": "hi" })),
            ))
            .await
            .expect("response");
        let failed = json_body(failed).await;
        let notice = "Error: API key not found. Please set it.";
        assert_eq!(
            texts(&failed["view"]),
            [welcome.as_str(), "hi", notice]
        );

        let reloaded = app
            .oneshot(request("GET", "/api/messages", Some("U9"), None))
            .await
            .expect("response");
        assert_eq!(texts(&json_body(reloaded).await), [welcome.as_str(), "hi"]);
    }

    #[tokio::test]
    async fn test_idle_sessions_are_evicted_unless_streaming() {
        let state = state_with(None).await;
        let app = create_router(Arc::clone(&state));

        for n in 0..20 {
            let owner = format!("visitor-{n}");
            let response = app
                .clone()
                .oneshot(request("GET", "/api/messages", Some(owner.as_str()), None))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(state.session_count(), 20);

        let stream = app
            .oneshot(request("GET", "/api/messages/stream", Some("watcher"), None))
            .await
            .expect("response");
        assert_eq!(state.session_count(), 21);

        assert_eq!(state.evict_idle(Duration::ZERO).await, 20);
        assert_eq!(state.session_count(), 1);

        drop(stream);
        assert_eq!(state.evict_idle(Duration::ZERO).await, 1);
        assert_eq!(state.session_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_share_one_session() {
        let state = state_with(Some(Arc::new(Canned))).await;
        let app = create_router(Arc::clone(&state));

        let (posted, listed) = tokio::join!(
            app.clone().oneshot(request(
                "POST",
                "/api/messages",
                Some("U5"),
                Some(serde_json::json!({ "text": "first words" })),
            )),
            app.clone().oneshot(request("GET", "/api/messages", Some("U5"), None)),
        );
        assert_eq!(posted.expect("response").status(), StatusCode::OK);
        assert_eq!(listed.expect("response").status(), StatusCode::OK);
        assert_eq!(state.session_count(), 1);

        let owner = OwnerId::new("U5").expect("owner");
        let stored = state.store.query_user_messages(&owner).await.expect("query");
        assert_eq!(stored.iter().filter(|m| m.is_welcome_message).count(), 1);
        assert!(stored[0].is_welcome_message);
        assert_eq!(stored[1].text, "first words");
        assert_eq!(stored[2].text, "Recursion is...");
    }
}

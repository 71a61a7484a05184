use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Form, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use pulldown_cmark::{Event, Options, Parser, html};
use chrono::Utc;
use serde::Serialize;
use tera::{Context, Tera};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Result, ScreeningError};
use crate::models::Summary;
use crate::service::ScreeningService;
use crate::session::ScreeningSession;

const INCOMPLETE_WARNING: &str = "Please answer all questions before generating the summary.";

type SessionMap = HashMap<Uuid, ScreeningSession>;

/// Shared state for the HTTP surface. Sessions live only in memory and are keyed by a random id.
///
/// A session older than `session_ttl` is treated as gone: it answers 404 and is dropped from the
/// map the next time it is looked up or a new session is created.
#[derive(Clone)]
pub struct AppState {
    service: Arc<ScreeningService>,
    sessions: Arc<Mutex<SessionMap>>,
    templates: Arc<Tera>,
    session_ttl: Duration,
}

impl AppState {
    pub fn new(service: Arc<ScreeningService>) -> Result<Self> {
        let session_ttl = service.config().session_ttl();
        Ok(Self {
            service,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            templates: Arc::new(load_templates()?),
            session_ttl,
        })
    }

    fn is_expired(&self, session: &ScreeningSession) -> bool {
        // a clock that went backwards yields a negative age, which never expires
        (Utc::now() - session.created_at())
            .to_std()
            .is_ok_and(|age| age >= self.session_ttl)
    }

    fn evict_expired(&self, sessions: &mut SessionMap) {
        let before = sessions.len();
        sessions.retain(|_, session| !self.is_expired(session));
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::info!(evicted, "Expired screening sessions evicted");
        }
    }

    fn live_session<'a>(
        &self,
        sessions: &'a mut SessionMap,
        id: Uuid,
    ) -> Result<&'a mut ScreeningSession> {
        if sessions.get(&id).is_some_and(|s| self.is_expired(s)) {
            sessions.remove(&id);
            tracing::info!(%id, "Screening session expired");
        }
        sessions
            .get_mut(&id)
            .ok_or_else(|| ScreeningError::SessionNotFound(id.to_string()))
    }

    fn page(&self, template: &str, ctx: &Context) -> Result<Html<String>> {
        self.templates
            .render(template, ctx)
            .map(Html)
            .map_err(|e| ScreeningError::Internal(format!("Failed to render {template}: {e}")))
    }

    fn base_context(&self) -> Context {
        let mut ctx = Context::new();
        ctx.insert("title", &self.service.config().server.name);
        ctx
    }

    fn screening_page(
        &self,
        id: Uuid,
        session: &ScreeningSession,
        notice: Notice,
    ) -> Result<Html<String>> {
        let mut ctx = self.base_context();
        ctx.insert("session_id", &id.to_string());
        ctx.insert("submitted", &session.is_submitted());
        let questions: Vec<QuestionView<'_>> = session
            .questions()
            .iter()
            .zip(session.answers())
            .enumerate()
            .map(|(index, (text, answer))| QuestionView {
                index,
                text,
                answer,
            })
            .collect();
        ctx.insert("questions", &questions);

        match notice {
            Notice::None => {}
            Notice::Warning(text) => ctx.insert("warning", &text),
            Notice::Failure { error, hint } => {
                ctx.insert("error", &error);
                ctx.insert("hint", &hint);
            }
            Notice::Summary(summary) => {
                ctx.insert("summary_html", &render_markdown(&summary.text));
                ctx.insert("model", &summary.model);
                ctx.insert("elapsed_ms", &(summary.elapsed.as_millis() as u64));
                ctx.insert(
                    "generated_at",
                    &summary.generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                );
            }
        }

        self.page("screening.html", &ctx)
    }
}

#[derive(Serialize)]
struct QuestionView<'a> {
    index: usize,
    text: &'a str,
    answer: &'a str,
}

enum Notice {
    None,
    Warning(String),
    Failure { error: String, hint: Option<String> },
    Summary(Summary),
}

fn load_templates() -> Result<Tera> {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![
        ("base.html", include_str!("../templates/base.html")),
        ("landing.html", include_str!("../templates/landing.html")),
        ("screening.html", include_str!("../templates/screening.html")),
    ])
    .map_err(|e| ScreeningError::Internal(format!("Failed to load page templates: {e}")))?;
    Ok(tera)
}

/// Model output is markdown. Raw HTML inside it is shown as text rather than interpreted.
pub fn render_markdown(text: &str) -> String {
    let parser = Parser::new_ext(text, Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH)
        .map(|event| match event {
            Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
            other => other,
        });
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(landing))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(show_session))
        .route("/sessions/:id/submit", post(submit_session))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

async fn landing(State(state): State<AppState>) -> Result<Html<String>> {
    state.page("landing.html", &state.base_context())
}

async fn create_session(State(state): State<AppState>) -> Redirect {
    let mut session = state.service.new_session();
    session.start();
    let id = Uuid::new_v4();
    let active = {
        let mut sessions = state.sessions.lock().await;
        state.evict_expired(&mut sessions);
        sessions.insert(id, session);
        sessions.len()
    };
    tracing::info!(%id, active, "Screening session created");
    Redirect::to(&format!("/sessions/{id}"))
}

async fn show_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Html<String>> {
    let mut sessions = state.sessions.lock().await;
    let session = state.live_session(&mut sessions, id)?;
    state.screening_page(id, session, Notice::None)
}

async fn submit_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Response> {
    // The lock is released before the backend call.
    let snapshot = {
        let mut sessions = state.sessions.lock().await;
        let session = state.live_session(&mut sessions, id)?;

        if !session.is_submitted() {
            for index in 0..session.questions().len() {
                if let Some(value) = form.get(&format!("answer_{index}")) {
                    session.set_answer(index, value.as_str())?;
                }
            }
        }

        match session.submit() {
            Ok(_) => session.clone(),
            Err(ScreeningError::ValidationFailed { missing }) => {
                tracing::info!(%id, ?missing, "Incomplete screening submitted");
                let page = state.screening_page(
                    id,
                    session,
                    Notice::Warning(INCOMPLETE_WARNING.to_string()),
                )?;
                return Ok((StatusCode::UNPROCESSABLE_ENTITY, page).into_response());
            }
            Err(e) => return Err(e),
        }
    };

    tracing::info!(%id, "Generating AI summary");
    match state.service.generate(&snapshot).await {
        Ok(summary) => {
            let page = state.screening_page(id, &snapshot, Notice::Summary(summary))?;
            Ok(page.into_response())
        }
        Err(e) if e.is_backend_failure() => {
            let status = match e {
                ScreeningError::BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            };
            let notice = Notice::Failure {
                hint: state.service.remediation_hint(&e),
                error: e.to_string(),
            };
            let page = state.screening_page(id, &snapshot, notice)?;
            Ok((status, page).into_response())
        }
        Err(e) => Err(e),
    }
}

impl IntoResponse for ScreeningError {
    fn into_response(self) -> Response {
        let status = match &self {
            ScreeningError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ScreeningError::ValidationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ScreeningError::InvalidIndex { .. }
            | ScreeningError::NotStarted
            | ScreeningError::AlreadySubmitted
            | ScreeningError::NotSubmitted
            | ScreeningError::LengthMismatch { .. } => StatusCode::BAD_REQUEST,
            ScreeningError::BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ScreeningError::BackendUnavailable(_) | ScreeningError::BackendError(_) => {
                StatusCode::BAD_GATEWAY
            }
            ScreeningError::Config(_) | ScreeningError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::GenerateResponse;
    use crate::transport::MockTransport;
    use axum::body::Body;
    use axum::http::{Request, header};
    use tower::ServiceExt;

    const COMPLETE_FORM: &str = "answer_0=a&answer_1=b&answer_2=c&answer_3=d&answer_4=e";

    fn state_with(tx: MockTransport) -> AppState {
        let service = ScreeningService::with_transport(Arc::new(Config::default()), Arc::new(tx));
        AppState::new(Arc::new(service)).unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn start_session(state: &AppState) -> String {
        let resp = router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sessions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        resp.headers()[header::LOCATION].to_str().unwrap().to_string()
    }

    fn session_id(location: &str) -> Uuid {
        location.trim_start_matches("/sessions/").parse().unwrap()
    }

    async fn fetch(state: &AppState, uri: &str) -> Response {
        router(state.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn submit(state: &AppState, location: &str, body: &str) -> Response {
        router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("{location}/submit"))
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let resp = router(state_with(MockTransport::new()))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "ok");
    }

    #[tokio::test]
    async fn test_landing_offers_start() {
        let resp = router(state_with(MockTransport::new()))
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_text(resp).await;
        assert!(body.contains("ED Mental Health Screening Demo"));
        assert!(body.contains("Start Screening"));
    }

    #[tokio::test]
    async fn test_form_lists_questions_in_order() {
        let state = state_with(MockTransport::new());
        let location = start_session(&state).await;

        let resp = router(state.clone())
            .oneshot(Request::builder().uri(&location).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_text(resp).await;
        let positions: Vec<usize> = (0..5)
            .map(|i| body.find(&format!("name=\"answer_{i}\"")).expect("input rendered"))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(body.contains("Generate AI Summary"));
    }

    #[tokio::test]
    async fn test_incomplete_form_warns_without_backend_call() {
        let mut tx = MockTransport::new();
        tx.expect_generate().times(0);
        let state = state_with(tx);
        let location = start_session(&state).await;

        let form = "answer_0=a&answer_1=&answer_2=c&answer_3=d&answer_4=e";
        let resp = submit(&state, &location, form).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_text(resp).await;
        assert!(body.contains(INCOMPLETE_WARNING));
        // entered answers are kept
        assert!(body.contains("value=\"c\""));
    }

    #[tokio::test]
    async fn test_complete_form_renders_summary() {
        let mut tx = MockTransport::new();
        tx.expect_generate().times(1).returning(|_, req| {
            assert!(req.prompt.contains("Answer: eight"));
            Ok(GenerateResponse {
                response: "**Clinical Summary:**\n\n- poor sleep\n\n<script>alert(1)</script>"
                    .to_string(),
                model: Some("qwen2.5:7b".to_string()),
                done: true,
            })
        });
        let state = state_with(tx);
        let location = start_session(&state).await;

        let form = "answer_0=a&answer_1=b&answer_2=eight&answer_3=d&answer_4=e";
        let resp = submit(&state, &location, form).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_text(resp).await;
        assert!(body.contains("Summary Generated"));
        assert!(body.contains("<strong>Clinical Summary:</strong>"));
        assert!(body.contains("<li>poor sleep</li>"));
        assert!(!body.contains("<script>alert(1)</script>"));
    }

    #[tokio::test]
    async fn test_backend_failure_shows_hint_and_keeps_answers() {
        let mut tx = MockTransport::new();
        tx.expect_generate()
            .times(1)
            .returning(|_, _| {
                Err(ScreeningError::BackendUnavailable(
                    "connection refused".to_string(),
                ))
            });
        let state = state_with(tx);
        let location = start_session(&state).await;

        let resp = submit(&state, &location, COMPLETE_FORM).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = body_text(resp).await;
        assert!(body.contains("Error communicating with Ollama"));
        assert!(body.contains(
            "Please make sure Ollama is running and the model &#x27;qwen2.5:7b&#x27; is pulled."
        ));
        assert!(body.contains("Retry AI Summary"));
        assert!(body.contains("value=\"a\""));
    }

    #[tokio::test]
    async fn test_retry_after_failure_reuses_submitted_answers() {
        let mut seq = mockall::Sequence::new();
        let mut tx = MockTransport::new();
        tx.expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Err(ScreeningError::BackendUnavailable(
                    "connection refused".to_string(),
                ))
            });
        tx.expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, req| {
                assert!(req.prompt.contains("Answer: c"));
                Ok(GenerateResponse {
                    response: "**Clinical Summary:** recovered".to_string(),
                    model: None,
                    done: true,
                })
            });
        let state = state_with(tx);
        let location = start_session(&state).await;

        let resp = submit(&state, &location, COMPLETE_FORM).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        // answers are frozen after the first submit, so the retry needs no fields
        let resp = submit(&state, &location, "").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_text(resp).await;
        assert!(body.contains("<strong>Clinical Summary:</strong> recovered"));
        assert!(!body.contains("Error communicating with Ollama"));
    }

    #[tokio::test]
    async fn test_expired_session_is_not_found() {
        let mut tx = MockTransport::new();
        tx.expect_generate().times(0);
        let state = state_with(tx);
        let location = start_session(&state).await;
        let id = session_id(&location);
        {
            let mut sessions = state.sessions.lock().await;
            sessions
                .get_mut(&id)
                .unwrap()
                .backdate(chrono::Duration::hours(2));
        }

        let resp = fetch(&state, &location).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = submit(&state, &location, COMPLETE_FORM).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(state.sessions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_new_session_evicts_expired_ones() {
        let state = state_with(MockTransport::new());
        let stale = session_id(&start_session(&state).await);
        let live = session_id(&start_session(&state).await);
        state
            .sessions
            .lock()
            .await
            .get_mut(&stale)
            .unwrap()
            .backdate(chrono::Duration::hours(2));

        let fresh = session_id(&start_session(&state).await);
        let sessions = state.sessions.lock().await;
        assert_eq!(sessions.len(), 2);
        assert!(!sessions.contains_key(&stale));
        assert!(sessions.contains_key(&live));
        assert!(sessions.contains_key(&fresh));
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let resp = router(state_with(MockTransport::new()))
            .oneshot(
                Request::builder()
                    .uri(format!("/sessions/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_markdown_escapes_raw_html() {
        let html = render_markdown("**Risk Flags:**\n\n- stress <b>high</b>");
        assert!(html.contains("<strong>Risk Flags:</strong>"));
        assert!(html.contains("&lt;b&gt;high&lt;/b&gt;"));
    }
}

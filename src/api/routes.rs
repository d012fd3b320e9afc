use crate::config::Config;
use crate::engine::HabitEngine;
use crate::error::{ErrorKind, HabitError};
use crate::habits::complete::CompletionOutcome;
use crate::habits::ledger::today_start;
use crate::habits::{Habit, HabitCompletion};
use crate::streaks::StreakReport;
use crate::streaks::ranking::RankedHabits;
use crate::sync::SessionPhase;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<HabitEngine>,
    pub config: Arc<Config>,
}

impl ApiState {
    fn user_id(&self) -> ApiResult<&str> {
        self.config
            .require_user()
            .map_err(|error| ApiError::BadRequest(error.to_string()))
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/status", get(status))
        .route("/api/v1/habits", get(habits_list).post(habits_create))
        .route("/api/v1/habits/:id", delete(habits_delete))
        .route("/api/v1/habits/:id/complete", post(habits_complete))
        .route("/api/v1/habits/:id/streak", get(habit_streak))
        .route("/api/v1/streaks", get(streaks))
        .route("/api/v1/completions", get(completions_list))
        .route("/api/v1/completions/today", get(completions_today))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct StatusPayload {
    #[serde(flatten)]
    phase: SessionPhase,
    loaded: bool,
    habits_feed: bool,
    completions_feed: bool,
    habit_count: usize,
    completed_today: usize,
    api_port: u16,
}

#[derive(Debug, Deserialize)]
struct CreateHabitPayload {
    title: String,
    description: String,
    #[serde(default = "default_frequency")]
    frequency: String,
}

#[derive(Debug, Serialize)]
struct HabitsPayload {
    count: usize,
    habits: Vec<Habit>,
}

#[derive(Debug, Serialize)]
struct CompletionsPayload {
    count: usize,
    completions: Vec<HabitCompletion>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum CompletePayload {
    AlreadyCompleted,
    Recorded {
        completion: HabitCompletion,
        habit: Habit,
    },
}

#[derive(Debug, Serialize)]
struct StreakPayload {
    #[serde(flatten)]
    report: StreakReport,
    divergence: Option<i64>,
}

fn default_frequency() -> String {
    "daily".to_string()
}

async fn status(State(state): State<ApiState>) -> ApiResult<Json<StatusPayload>> {
    let snapshot = state.engine.sync().snapshot();
    let midnight = today_start().map_err(HabitError::from)?;

    Ok(Json(StatusPayload {
        phase: snapshot.phase(),
        loaded: snapshot.is_loaded(),
        habits_feed: snapshot.habits_feed,
        completions_feed: snapshot.completions_feed,
        habit_count: snapshot.habits.len(),
        completed_today: snapshot.today_since(midnight).len(),
        api_port: state.config.api_port,
    }))
}

async fn habits_list(State(state): State<ApiState>) -> ApiResult<Json<HabitsPayload>> {
    let habits = state.engine.list_habits(state.user_id()?).await?;
    Ok(Json(HabitsPayload {
        count: habits.len(),
        habits,
    }))
}

async fn habits_create(
    State(state): State<ApiState>,
    Json(payload): Json<CreateHabitPayload>,
) -> ApiResult<(StatusCode, Json<Habit>)> {
    let habit = state
        .engine
        .create_habit(
            state.user_id()?,
            &payload.title,
            &payload.description,
            &payload.frequency,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(habit)))
}

async fn habits_delete(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.delete_habit(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn habits_complete(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CompletePayload>> {
    let outcome = state.engine.mark_complete(state.user_id()?, &id).await?;
    let payload = match outcome {
        CompletionOutcome::AlreadyCompleted => CompletePayload::AlreadyCompleted,
        CompletionOutcome::Recorded { completion, habit } => {
            CompletePayload::Recorded { completion, habit }
        }
    };
    Ok(Json(payload))
}

async fn habit_streak(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StreakPayload>> {
    let report = state.engine.get_streak_data(state.user_id()?, &id).await?;
    Ok(Json(StreakPayload {
        divergence: report.divergence(),
        report,
    }))
}

async fn streaks(State(state): State<ApiState>) -> ApiResult<Json<RankedHabits>> {
    Ok(Json(state.engine.get_ranked_habits(state.user_id()?).await?))
}

async fn completions_list(State(state): State<ApiState>) -> ApiResult<Json<CompletionsPayload>> {
    let completions = state.engine.list_completions(state.user_id()?).await?;
    Ok(Json(CompletionsPayload {
        count: completions.len(),
        completions,
    }))
}

async fn completions_today(State(state): State<ApiState>) -> ApiResult<Json<CompletionsPayload>> {
    let completions = state.engine.list_today(state.user_id()?).await?;
    Ok(Json(CompletionsPayload {
        count: completions.len(),
        completions,
    }))
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<HabitError> for ApiError {
    fn from(value: HabitError) -> Self {
        if value.is_not_found() {
            return Self::NotFound(value.to_string());
        }
        match value.kind() {
            ErrorKind::Validation => Self::BadRequest(value.to_string()),
            ErrorKind::Remote | ErrorKind::Subscription => Self::Internal(value.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Internal(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": error.to_string() })),
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ApiError, ApiState, CompletePayload, CreateHabitPayload, habit_streak, habits_complete,
        habits_create, habits_delete, habits_list,
    };
    use crate::config::Config;
    use crate::engine::HabitEngine;
    use crate::error::{HabitError, ValidationError};
    use crate::store::RemoteError;
    use crate::store::sqlite::SqliteStore;
    use axum::Json;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::sync::Arc;

    fn state() -> ApiState {
        let mut config = Config::default();
        config.set_value("user_id", "u1").expect("user");
        let store = SqliteStore::open_in_memory(&config.database_id).expect("store");
        let engine = HabitEngine::new(Arc::new(store), &config.engine_settings());
        ApiState {
            engine: Arc::new(engine),
            config: Arc::new(config),
        }
    }

    fn create_payload(title: &str, frequency: &str) -> Json<CreateHabitPayload> {
        Json(CreateHabitPayload {
            title: title.to_string(),
            description: "20 pages".to_string(),
            frequency: frequency.to_string(),
        })
    }

    fn status_of(error: ApiError) -> StatusCode {
        error.into_response().status()
    }

    #[test]
    fn errors_map_to_status_codes() {
        let validation = HabitError::from(ValidationError::Missing { field: "title" });
        let missing = HabitError::from(RemoteError::NotFound {
            collection: "habits".to_string(),
            id: "h1".to_string(),
        });
        let backend = HabitError::from(RemoteError::Backend("offline".to_string()));

        assert_eq!(status_of(validation.into()), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(missing.into()), StatusCode::NOT_FOUND);
        assert_eq!(status_of(backend.into()), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn create_list_complete_and_delete() {
        let state = state();

        let (status, Json(habit)) =
            habits_create(State(state.clone()), create_payload("Read", "weekly"))
                .await
                .expect("create");
        assert_eq!(status, StatusCode::CREATED);

        let Json(listed) = habits_list(State(state.clone())).await.expect("list");
        assert_eq!(listed.count, 1);

        let Json(first) = habits_complete(State(state.clone()), Path(habit.id.clone()))
            .await
            .expect("complete");
        assert!(matches!(first, CompletePayload::Recorded { .. }));
        let Json(second) = habits_complete(State(state.clone()), Path(habit.id.clone()))
            .await
            .expect("complete again");
        assert!(matches!(second, CompletePayload::AlreadyCompleted));

        let Json(streak) = habit_streak(State(state.clone()), Path(habit.id.clone()))
            .await
            .expect("streak");
        assert_eq!(streak.divergence, Some(0));

        let status = habits_delete(State(state.clone()), Path(habit.id.clone()))
            .await
            .expect("delete");
        assert_eq!(status, StatusCode::NO_CONTENT);

        let missing = habits_delete(State(state), Path(habit.id))
            .await
            .expect_err("already deleted");
        assert_eq!(status_of(missing), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_frequency_is_bad_request() {
        let error = habits_create(State(state()), create_payload("Read", "hourly"))
            .await
            .expect_err("invalid");

        let ApiError::BadRequest(message) = error else {
            panic!("expected a bad request");
        };
        assert!(message.starts_with("unsupported frequency: hourly"), "{message}");
    }

    #[test]
    fn create_payload_requires_description_and_defaults_frequency() {
        assert!(serde_json::from_str::<CreateHabitPayload>(r#"{ "title": "Read" }"#).is_err());

        let payload: CreateHabitPayload =
            serde_json::from_str(r#"{ "title": "Read", "description": "20 pages" }"#)
                .expect("payload");
        assert_eq!(payload.frequency, "daily");
    }
}

//! End-to-end round trip through the HTTP router backed by the in-memory store.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use futures::future::BoxFuture;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use mixtape_party_back::{
    config::AppConfig,
    dao::game_store::{GameStore, memory::MemoryGameStore},
    providers::{
        ProviderResult, TrackSearchItem, TrackSearchProvider, VideoSearchItem, VideoSearchProvider,
    },
    routes,
    state::{AppState, Providers, SharedState},
};

const MAINTENANCE_TOKEN: &str = "sweep-secret";

struct FakeVideos;

impl VideoSearchProvider for FakeVideos {
    fn search(
        &self,
        query: String,
        _category: Option<&'static str>,
        _max_results: u32,
    ) -> BoxFuture<'static, ProviderResult<Vec<VideoSearchItem>>> {
        let items = if query.contains("Nobody") {
            Vec::new()
        } else {
            vec![VideoSearchItem {
                id: "abc123".into(),
                title: "Queen - Under Pressure (Official Audio)".into(),
                thumbnail: None,
                channel_title: "Queen - Topic".into(),
                published_at: None,
            }]
        };
        Box::pin(async move { Ok(items) })
    }
}

struct FakeTracks;

impl TrackSearchProvider for FakeTracks {
    fn search(
        &self,
        query: String,
        limit: u32,
    ) -> BoxFuture<'static, ProviderResult<Vec<TrackSearchItem>>> {
        let items = (0..limit.min(2))
            .map(|index| TrackSearchItem {
                id: format!("track-{index}"),
                name: query.clone(),
                artist: "Queen".into(),
                album_art: None,
                album: None,
            })
            .collect();
        Box::pin(async move { Ok(items) })
    }
}

async fn app() -> (SharedState, Router) {
    let state = AppState::new(
        AppConfig::default(),
        Providers {
            video: Arc::new(FakeVideos),
            tracks: Arc::new(FakeTracks),
        },
        Some(MAINTENANCE_TOKEN.into()),
    );
    let store: Arc<dyn GameStore> = Arc::new(MemoryGameStore::new());
    state.set_game_store(store).await;
    let router = routes::router(state.clone());
    (state, router)
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    player: Option<Uuid>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(player) = player {
        request = request.header("x-player-id", player.to_string());
    }
    let body = match body {
        Some(body) => {
            request = request.header("content-type", "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

fn score_of(session: &Value, player: Uuid) -> u64 {
    session["players"]
        .as_array()
        .unwrap()
        .iter()
        .find(|entry| entry["id"] == player.to_string())
        .and_then(|entry| entry["score"].as_u64())
        .unwrap()
}

#[tokio::test]
async fn full_round_scores_votes_and_speed_bonus() {
    let (_state, router) = app().await;
    let host = Uuid::new_v4();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let (status, created) = send(
        &router,
        "POST",
        "/sessions",
        Some(host),
        Some(json!({ "host_name": "Host" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_owned();
    let code = created["code"].as_str().unwrap().to_lowercase();

    for (player, name) in [(alice, "Alice"), (bob, "Bob")] {
        let (status, _) = send(
            &router,
            "POST",
            "/sessions/join",
            Some(player),
            Some(json!({ "code": code, "name": name })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    send(&router, "POST", &format!("/sessions/{id}/ready"), Some(alice), None).await;
    let (_, session) =
        send(&router, "POST", &format!("/sessions/{id}/ready"), Some(bob), None).await;
    assert_eq!(session["phase"], "selecting");
    assert_eq!(session["round"], 1);

    let song = |name: &str| {
        json!({ "song_id": name, "song_name": name, "artist": "Queen" })
    };
    let (_, host_sub) = send(
        &router,
        "POST",
        &format!("/sessions/{id}/submission"),
        Some(host),
        Some(song("Under Pressure")),
    )
    .await;
    let (_, alice_sub) = send(
        &router,
        "POST",
        &format!("/sessions/{id}/submission"),
        Some(alice),
        Some(song("Bohemian Rhapsody")),
    )
    .await;
    let (status, passed) =
        send(&router, "POST", &format!("/sessions/{id}/pass"), Some(bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(passed["session"]["phase"], "voting");

    let host_song = host_sub["submission_id"].as_str().unwrap();
    let alice_song = alice_sub["submission_id"].as_str().unwrap();

    // Three active players: voting for your own song is rejected.
    let (status, error) = send(
        &router,
        "POST",
        &format!("/sessions/{id}/votes"),
        Some(host),
        Some(json!({ "submission_id": host_song })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error["code"], "self_vote_not_allowed");

    for (voter, target) in [(alice, host_song), (bob, host_song), (host, alice_song)] {
        let (status, _) = send(
            &router,
            "POST",
            &format!("/sessions/{id}/votes"),
            Some(voter),
            Some(json!({ "submission_id": target })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, session) = send(&router, "GET", &format!("/sessions/{id}"), None, None).await;
    assert_eq!(session["phase"], "results");
    assert_eq!(score_of(&session, host), 3);
    assert_eq!(score_of(&session, alice), 1);
    assert_eq!(score_of(&session, bob), 0);
    assert_eq!(session["last_round"]["winners"][0], host_song);

    // A guest cannot move the game on.
    let (status, error) = send(
        &router,
        "POST",
        &format!("/sessions/{id}/rounds/next"),
        Some(alice),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error["code"], "permission_denied");

    let (status, ended) =
        send(&router, "POST", &format!("/sessions/{id}/end"), Some(host), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["session"]["phase"], "ended");
    assert_eq!(ended["final_round"]["round"], 1);
}

#[tokio::test]
async fn stale_and_malformed_requests_are_rejected() {
    let (_state, router) = app().await;
    let host = Uuid::new_v4();

    let (status, _) = send(
        &router,
        "POST",
        "/sessions",
        None,
        Some(json!({ "host_name": "Host" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &router,
        "POST",
        "/sessions",
        Some(host),
        Some(json!({ "host_name": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, created) = send(
        &router,
        "POST",
        "/sessions",
        Some(host),
        Some(json!({ "host_name": "Host" })),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let (status, error) = send(
        &router,
        "POST",
        &format!("/sessions/{id}/start"),
        Some(host),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["code"], "insufficient_players");

    let (status, error) = send(
        &router,
        "POST",
        &format!("/sessions/{id}/pass"),
        Some(host),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["code"], "invalid_phase");

    let (status, _) = send(
        &router,
        "GET",
        &format!("/sessions/{}", Uuid::new_v4()),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn media_lookups_map_to_status_codes() {
    let (_state, router) = app().await;

    let (status, body) = send(
        &router,
        "GET",
        "/media/resolve?artist=Queen&track=Under%20Pressure",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "found");
    assert_eq!(body["media"]["external_id"], "abc123");
    assert_eq!(body["media"]["from_cache"], false);

    let (_, again) = send(
        &router,
        "GET",
        "/media/resolve?artist=queen&track=under%20pressure",
        None,
        None,
    )
    .await;
    assert_eq!(again["media"]["from_cache"], true);

    let (status, body) = send(
        &router,
        "GET",
        "/media/resolve?artist=Nobody&track=Nothing",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "not_found");

    let (status, tracks) = send(
        &router,
        "GET",
        "/songs/search?q=Under%20Pressure&limit=5",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tracks.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn maintenance_endpoints_require_the_token() {
    let (_state, router) = app().await;

    let (status, _) = send(&router, "GET", "/media/stats", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("GET")
        .uri("/media/stats")
        .header("x-maintenance-token", MAINTENANCE_TOKEN)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder()
        .method("POST")
        .uri("/media/evict")
        .header("x-maintenance-token", MAINTENANCE_TOKEN)
        .header("content-type", "application/json")
        .body(Body::from(r#"{"max_entries":1}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let report: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(report["examined"], 0);
}

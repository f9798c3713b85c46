//! Drives the full router in-process with `tower::ServiceExt::oneshot`.

use askbox::auth::session;
use askbox::config::{Cli, Config};
use askbox::qa::{content, NewQuestion, QuestionId, UserId};
use askbox::state::AppState;
use askbox::{db, routes};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    state: AppState,
    dir: TempDir,
}

impl TestApp {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let cli = Cli {
            config: None,
            host: None,
            port: None,
            data_dir: Some(dir.path().to_path_buf()),
        };
        let mut config = Config::load(&cli).unwrap();
        config.auth.bcrypt_cost = 4;
        let pool = db::create_pool(&config.db_path()).unwrap();
        db::run_migrations(&pool).unwrap();

        Self {
            state: AppState { db: pool, config },
            dir,
        }
    }

    fn router(&self) -> Router {
        routes::router().with_state(self.state.clone())
    }

    /// Create a user with a cheap hash and return it with a session cookie.
    fn user(&self, username: &str, password: &str) -> (UserId, String) {
        let conn = self.state.db.get().unwrap();
        let hash = bcrypt::hash(password, 4).unwrap();
        let user = content::create_user(&conn, username, None, &hash, Utc::now()).unwrap();
        let token = session::create_session(&conn, &user.id, 1).unwrap();
        (user.id, format!("{}={}", self.state.config.auth.cookie_name, token))
    }

    fn question(&self, author: &UserId, title: &str, tags: &[&str]) -> QuestionId {
        let conn = self.state.db.get().unwrap();
        content::create_question(
            &conn,
            author,
            &NewQuestion {
                title: title.to_string(),
                text: "Some details".to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
            },
            Utc::now(),
        )
        .unwrap()
        .id
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_form(uri: &str, cookie: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

const BOUNDARY: &str = "askbox-test-boundary";

struct FilePart<'a> {
    field: &'a str,
    file_name: &'a str,
    content_type: &'a str,
    bytes: &'a [u8],
}

fn post_multipart(
    uri: &str,
    cookie: Option<&str>,
    fields: &[(&str, &str)],
    file: Option<FilePart<'_>>,
) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(file) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                file.field, file.file_name, file.content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(file.bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let mut builder = Request::builder().method("POST").uri(uri).header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={BOUNDARY}"),
    );
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body)).unwrap()
}

fn session_cookie(response: &axum::response::Response) -> String {
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn home_lists_newest_questions_and_sidebar() {
    let app = TestApp::new();
    let (alice, _) = app.user("alice", "secret-pass");
    app.question(&alice, "How do closures capture", &["rust"]);

    let response = app.router().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let html = body_text(response).await;
    assert!(html.contains("How do closures capture"));
    assert!(html.contains("/tag/rust"));
    assert!(html.contains("alice"));
}

#[tokio::test]
async fn unknown_tag_is_not_found() {
    let app = TestApp::new();
    let response = app.router().oneshot(get("/tag/cobol")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn page_out_of_range_is_not_found() {
    let app = TestApp::new();
    let response = app.router().oneshot(get("/hot?page=2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_question_is_not_found() {
    let app = TestApp::new();
    let response = app.router().oneshot(get("/questions/missing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn asking_requires_a_session() {
    let app = TestApp::new();
    let response = app
        .router()
        .oneshot(post_form("/ask", None, "title=Hi&text=There"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn asking_creates_question_and_redirects() {
    let app = TestApp::new();
    let (_, cookie) = app.user("alice", "secret-pass");

    let response = app
        .router()
        .oneshot(post_form(
            "/ask",
            Some(&cookie),
            "title=What+is+a+trait&text=Explain+please&tags=rust%2C+traits",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let conn = app.state.db.get().unwrap();
    let listings = content::by_tag(&conn, "traits").unwrap();
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].question.title, "What is a trait");
}

#[tokio::test]
async fn invalid_question_is_rerendered() {
    let app = TestApp::new();
    let (_, cookie) = app.user("alice", "secret-pass");

    let response = app
        .router()
        .oneshot(post_form("/ask", Some(&cookie), "title=&text=Body"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn voting_updates_score_and_reputation() {
    let app = TestApp::new();
    let (alice, _) = app.user("alice", "secret-pass");
    let (_, bob_cookie) = app.user("bob", "secret-pass");
    let question = app.question(&alice, "Why is the sky blue", &["physics"]);
    let uri = format!("/questions/{question}/vote");

    let response = app
        .router()
        .oneshot(post_form(&uri, Some(&bob_cookie), "direction=like"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains(">1<"));

    {
        let conn = app.state.db.get().unwrap();
        assert_eq!(content::find_question(&conn, &question).unwrap().score, 1);
        assert_eq!(content::find_profile(&conn, &alice).unwrap().score, 1);
    }

    // Liking again withdraws the vote
    let response = app
        .router()
        .oneshot(post_form(&uri, Some(&bob_cookie), "direction=like"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let conn = app.state.db.get().unwrap();
    assert_eq!(content::find_question(&conn, &question).unwrap().score, 0);
    assert_eq!(content::find_profile(&conn, &alice).unwrap().score, 0);
}

#[tokio::test]
async fn bad_vote_direction_is_rejected() {
    let app = TestApp::new();
    let (alice, cookie) = app.user("alice", "secret-pass");
    let question = app.question(&alice, "Sideways votes", &[]);

    let response = app
        .router()
        .oneshot(post_form(
            &format!("/questions/{question}/vote"),
            Some(&cookie),
            "direction=sideways",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn only_the_asker_can_mark_correct() {
    let app = TestApp::new();
    let (alice, alice_cookie) = app.user("alice", "secret-pass");
    let (bob, bob_cookie) = app.user("bob", "secret-pass");
    let question = app.question(&alice, "Which sort is stable", &[]);
    let answer = {
        let conn = app.state.db.get().unwrap();
        content::create_answer(&conn, &bob, &question, "Merge sort", Utc::now()).unwrap()
    };
    let uri = format!("/answers/{}/correct", answer.id);

    let response = app
        .router()
        .oneshot(post_form(&uri, Some(&bob_cookie), ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .router()
        .oneshot(post_form(&uri, Some(&alice_cookie), ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let conn = app.state.db.get().unwrap();
    assert!(content::find_answer(&conn, &answer.id).unwrap().is_correct);
}

#[tokio::test]
async fn login_sets_session_cookie() {
    let app = TestApp::new();
    app.user("alice", "secret-pass");

    let response = app
        .router()
        .oneshot(post_form(
            "/auth/login",
            None,
            "username=alice&password=secret-pass&next=%2Fhot",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/hot");

    let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(cookie.starts_with("askbox_session="));
    assert!(cookie.contains("HttpOnly"));
}

#[tokio::test]
async fn login_with_wrong_password_is_unauthorized() {
    let app = TestApp::new();
    app.user("alice", "secret-pass");

    let response = app
        .router()
        .oneshot(post_form("/auth/login", None, "username=alice&password=nope"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn logout_ends_the_session() {
    let app = TestApp::new();
    let (_, cookie) = app.user("alice", "secret-pass");

    let response = app
        .router()
        .oneshot(post_form("/auth/logout", Some(&cookie), ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let response = app.router().oneshot(get_with_cookie("/settings", &cookie)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn stylesheet_is_served() {
    let app = TestApp::new();
    let response = app.router().oneshot(get("/assets/css/site.css")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css");
}

fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn listing_pages_hold_a_window_of_questions() {
    let app = TestApp::new();
    let (alice, _) = app.user("alice", "secret-pass");
    for i in 0..7 {
        app.question(&alice, &format!("Question number {i}"), &["bulk"]);
    }

    let html = body_text(app.router().oneshot(get("/")).await.unwrap()).await;
    assert_eq!(html.matches("class=\"question-summary\"").count(), 5);
    assert!(html.contains("Page 1 of 2"));

    let response = app.router().oneshot(get("/tag/bulk?page=2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert_eq!(html.matches("class=\"question-summary\"").count(), 2);
    assert!(html.contains("/tag/bulk?page=1"));
}

#[tokio::test]
async fn tag_links_survive_reserved_characters() {
    let app = TestApp::new();
    let (alice, _) = app.user("alice", "secret-pass");
    let question = app.question(&alice, "Sharp and slashed", &["c#", "a/b"]);

    let html = body_text(
        app.router()
            .oneshot(get(&format!("/questions/{question}")))
            .await
            .unwrap(),
    )
    .await;
    assert!(html.contains("href=\"/tag/c%23\""));
    assert!(html.contains("href=\"/tag/a%2Fb\""));

    for link in ["/tag/c%23", "/tag/a%2Fb"] {
        let response = app.router().oneshot(get(link)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{link}");
        assert!(body_text(response).await.contains("Sharp and slashed"));
    }
}

#[tokio::test]
async fn registering_applies_nickname_and_signs_in() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(post_multipart(
            "/auth/register",
            None,
            &[
                ("username", "carol"),
                ("email", "carol@example.com"),
                ("nickname", "Caz"),
                ("password", "long enough"),
                ("password2", "long enough"),
            ],
            Some(FilePart {
                field: "avatar",
                file_name: "me.jpg",
                content_type: "image/jpeg",
                bytes: b"jpeg-bytes",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let cookie = session_cookie(&response);

    let conn = app.state.db.get().unwrap();
    let user = content::find_user_by_username(&conn, "carol").unwrap();
    assert_eq!(user.email.as_deref(), Some("carol@example.com"));
    let profile = content::find_profile(&conn, &user.id).unwrap();
    assert_eq!(profile.nickname, "Caz");
    let avatar = profile.avatar_path.unwrap();
    assert!(avatar.ends_with(".jpg"));
    assert!(app.state.config.uploads_path().join(&avatar).exists());
    drop(conn);

    let response = app.router().oneshot(get_with_cookie("/settings", &cookie)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn registering_a_taken_username_is_rejected() {
    let app = TestApp::new();
    app.user("alice", "secret-pass");

    let response = app
        .router()
        .oneshot(post_multipart(
            "/auth/register",
            None,
            &[
                ("username", "alice"),
                ("email", "other@example.com"),
                ("nickname", "Other"),
                ("password", "long enough"),
                ("password2", "long enough"),
            ],
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert!(body_text(response).await.contains("already taken"));

    let conn = app.state.db.get().unwrap();
    let profiles: i64 = conn
        .query_row("SELECT COUNT(*) FROM profiles", [], |r| r.get(0))
        .unwrap();
    assert_eq!(profiles, 1);
}

#[tokio::test]
async fn registering_without_email_is_rejected() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(post_multipart(
            "/auth/register",
            None,
            &[
                ("username", "dave"),
                ("nickname", "Dave"),
                ("password", "long enough"),
                ("password2", "long enough"),
            ],
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let conn = app.state.db.get().unwrap();
    assert!(content::find_user_by_username(&conn, "dave").is_err());
}

#[tokio::test]
async fn answering_creates_answer_and_redirects() {
    let app = TestApp::new();
    let (alice, _) = app.user("alice", "secret-pass");
    let (_, bob_cookie) = app.user("bob", "secret-pass");
    let question = app.question(&alice, "What is ownership", &[]);

    let response = app
        .router()
        .oneshot(post_form(
            &format!("/questions/{question}/answers"),
            Some(&bob_cookie),
            "text=Every+value+has+one+owner",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
    assert!(location.starts_with(&format!("/questions/{question}#answer-")));

    let conn = app.state.db.get().unwrap();
    let answers = content::answers_for_question(&conn, &question).unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].answer.text, "Every value has one owner");
}

#[tokio::test]
async fn invalid_answer_rerenders_the_question() {
    let app = TestApp::new();
    let (alice, cookie) = app.user("alice", "secret-pass");
    let question = app.question(&alice, "What is borrowing", &[]);

    let response = app
        .router()
        .oneshot(post_form(
            &format!("/questions/{question}/answers"),
            Some(&cookie),
            "text=42+is+the+answer",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let html = body_text(response).await;
    assert!(html.contains("What is borrowing"));
    assert!(html.contains("Start your text with a letter"));
    assert!(html.contains("42 is the answer"));

    let conn = app.state.db.get().unwrap();
    assert!(content::answers_for_question(&conn, &question).unwrap().is_empty());
}

#[tokio::test]
async fn settings_update_account_and_serve_avatar() {
    let app = TestApp::new();
    let (alice, cookie) = app.user("alice", "secret-pass");

    let response = app
        .router()
        .oneshot(post_multipart(
            "/settings",
            Some(&cookie),
            &[
                ("username", "alicia"),
                ("email", "alicia@example.com"),
                ("nickname", "Ali"),
            ],
            Some(FilePart {
                field: "avatar",
                file_name: "face.png",
                content_type: "image/png",
                bytes: b"png-bytes",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let (user, profile) = {
        let conn = app.state.db.get().unwrap();
        (
            content::find_user(&conn, &alice).unwrap(),
            content::find_profile(&conn, &alice).unwrap(),
        )
    };
    assert_eq!(user.username, "alicia");
    assert_eq!(user.email.as_deref(), Some("alicia@example.com"));
    assert_eq!(profile.nickname, "Ali");
    let avatar = profile.avatar_path.unwrap();
    assert!(avatar.starts_with("avatars/") && avatar.ends_with(".png"));

    let response = app
        .router()
        .oneshot(get(&format!("/media/{avatar}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(body_text(response).await, "png-bytes");
}

#[tokio::test]
async fn settings_reject_a_taken_username() {
    let app = TestApp::new();
    let (_, cookie) = app.user("alice", "secret-pass");
    let (bob, _) = app.user("bob", "secret-pass");

    let response = app
        .router()
        .oneshot(post_multipart(
            "/settings",
            Some(&cookie),
            &[
                ("username", "bob"),
                ("email", "alice@example.com"),
                ("nickname", "Alice"),
            ],
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let conn = app.state.db.get().unwrap();
    assert_eq!(content::find_user_by_username(&conn, "bob").unwrap().id, bob);
    assert!(content::find_user_by_username(&conn, "alice").is_ok());
}

#[tokio::test]
async fn media_refuses_paths_outside_uploads() {
    let app = TestApp::new();
    let uploads = app.state.config.uploads_path();
    std::fs::create_dir_all(uploads.join("avatars")).unwrap();
    std::fs::write(uploads.join("avatars/ok.png"), b"fine").unwrap();
    std::fs::write(app.dir.path().join("secret.txt"), b"private").unwrap();

    let response = app.router().oneshot(get("/media/avatars/ok.png")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    for uri in [
        "/media/../secret.txt",
        "/media/%2e%2e/secret.txt",
        "/media/avatars/../../secret.txt",
        "/media/avatars//ok.png",
    ] {
        let response = app.router().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

use axum::http::StatusCode;
use reqwest::Client;
use serde_json::{Value, json};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;
use ticketbook_server::{server, storage};
use ticketbook_shared::api::endpoints as ep;
use ticketbook_shared::auth::Role;

const ADMIN_PASSWORD: &str = "admin-secret-1";
const STAFF_PASSWORD: &str = "teacher-secret-1";

struct TestServer {
    base: String,
    client: Client,
    handle: tokio::task::JoinHandle<()>,
    _tempdir: tempfile::TempDir,
}

impl TestServer {
    async fn spawn() -> Option<Self> {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let (addr, handle) = match start_server(&db_path).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                eprintln!("Skipping test due to sandbox restrictions: {e}");
                return None;
            }
            Err(e) => panic!("failed to start server: {e}"),
        };
        Some(Self {
            base: format!("http://{}", addr),
            client: Client::new(),
            handle,
            _tempdir: dir,
        })
    }

    async fn login(&self, email: &str, password: &str) -> Value {
        self.request_expect(
            "POST",
            ep::AUTH_LOGIN,
            None,
            Some(json!({"email": email, "password": password})),
            StatusCode::OK,
        )
        .await
    }

    async fn access_token(&self, email: &str, password: &str) -> String {
        token_of(&self.login(email, password).await)
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let url = ep::url(&self.base, path);
        let mut req = match method {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            other => panic!("unsupported method {other}"),
        };
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status();
        let text = resp.text().await.unwrap();
        let val = if text.is_empty() {
            json!(null)
        } else {
            serde_json::from_str(&text).unwrap_or(json!({"raw": text}))
        };
        (status, val)
    }

    async fn request_expect(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
        expected: StatusCode,
    ) -> Value {
        let (status, value) = self.request(method, path, token, body).await;
        assert_eq!(
            status, expected,
            "{method} {path} returned {status:?} with body {value:?}",
        );
        value
    }

    async fn post(&self, path: &str, token: &str, body: Value, expected: StatusCode) -> Value {
        self.request_expect("POST", path, Some(token), Some(body), expected)
            .await
    }

    async fn create_user(&self, token: &str, body: Value) -> String {
        let user = self.post(ep::USERS_CREATE, token, body, StatusCode::OK).await;
        id_of(&user)
    }

    async fn create_teacher(&self, admin: &str, email: &str) -> String {
        self.create_user(
            admin,
            json!({
                "role": "teacher",
                "first_name": "Tina",
                "last_name": "Teacher",
                "email": email,
                "password": STAFF_PASSWORD,
            }),
        )
        .await
    }

    async fn create_student(&self, admin: &str, teacher_ids: &[&str]) -> String {
        self.create_user(
            admin,
            json!({
                "role": "student",
                "first_name": "Sam",
                "last_name": "Student",
                "teacher_ids": teacher_ids,
            }),
        )
        .await
    }

    /// Issues a PIN as `issuer` and claims it; returns the session body.
    async fn pin_session(
        &self,
        issuer: &str,
        target: &str,
        role: Role,
        viewing: Option<&str>,
    ) -> Value {
        let pin = self
            .post(
                ep::PINS_GENERATE,
                issuer,
                json!({
                    "target_user_id": target,
                    "target_role": role,
                    "viewing_student_id": viewing,
                }),
                StatusCode::OK,
            )
            .await;
        let pin = pin["pin"].as_str().unwrap().to_string();
        self.request_expect(
            "POST",
            ep::PINS_CLAIM,
            None,
            Some(json!({"pin": pin})),
            StatusCode::OK,
        )
        .await
    }

    async fn balance(&self, token: &str, student: &str) -> i64 {
        let body = self
            .post(
                ep::TICKETS_BALANCE,
                token,
                json!({"student_id": student}),
                StatusCode::OK,
            )
            .await;
        body["balance"].as_i64().unwrap()
    }

    async fn history(&self, token: &str, student: &str) -> Vec<Value> {
        let body = self
            .post(
                ep::TICKETS_HISTORY,
                token,
                json!({"student_id": student, "per_page": 1000}),
                StatusCode::OK,
            )
            .await;
        body.as_array().unwrap().clone()
    }

    async fn adjust(&self, admin: &str, student: &str, amount: i64) -> Value {
        self.post(
            ep::TICKETS_ADJUST,
            admin,
            json!({"student_id": student, "amount": amount}),
            StatusCode::OK,
        )
        .await
    }

    async fn create_reward(&self, admin: &str, cost: i64) -> String {
        let reward = self
            .post(
                ep::REWARDS_CREATE,
                admin,
                json!({"name": "Sticker pack", "cost": cost}),
                StatusCode::OK,
            )
            .await;
        id_of(&reward)
    }

    /// Assigns an ad-hoc task and has the student complete it.
    async fn completed_task(&self, teacher: &str, student_token: &str, student: &str) -> String {
        let task = self
            .post(
                ep::TASKS_ASSIGN,
                teacher,
                json!({"student_id": student, "title": "Scales in G", "points": 15}),
                StatusCode::OK,
            )
            .await;
        let id = id_of(&task);
        let done = self
            .post(
                ep::TASKS_COMPLETE,
                student_token,
                json!({"assignment_id": id}),
                StatusCode::OK,
            )
            .await;
        assert_eq!(done["verification_status"], "pending");
        id
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn id_of(v: &Value) -> String {
    v["id"]
        .as_str()
        .map(|s| s.to_string())
        .unwrap_or_else(|| panic!("id missing from {v:?}"))
}

fn token_of(v: &Value) -> String {
    v["access_token"]
        .as_str()
        .map(|s| s.to_string())
        .unwrap_or_else(|| panic!("access_token missing from {v:?}"))
}

fn ledger_sum(rows: &[Value]) -> i64 {
    rows.iter().map(|r| r["amount"].as_i64().unwrap()).sum()
}

async fn start_server(
    tmp_db: &Path,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
    let admin_hash = bcrypt::hash(ADMIN_PASSWORD, 4).unwrap();
    let company = |id: &str, name: &str| server::CompanyConfig {
        id: id.into(),
        name: name.into(),
        instruments: vec![server::InstrumentConfig {
            id: format!("{id}-piano"),
            name: "Piano".into(),
        }],
    };
    let admin = |id: &str, company_id: &str, email: &str| server::UserConfig {
        id: id.into(),
        company_id: company_id.into(),
        role: Role::Admin,
        email: email.into(),
        password_hash: admin_hash.clone(),
        first_name: "Ada".into(),
        last_name: "Admin".into(),
    };
    let config = server::AppConfig {
        jwt_secret: "integration-test-secret".into(),
        refresh_token_salt: "integration-salt".into(),
        access_token_ttl_secs: 3600,
        refresh_token_ttl_days: 30,
        pin_ttl_minutes: 10,
        pin_length: 6,
        streak_milestone_days: 1,
        streak_bonus_tickets: 10,
        timezone: "Europe/Warsaw".into(),
        bcrypt_cost: 4,
        companies: vec![company("acme", "Acme Music"), company("globex", "Globex Strings")],
        users: vec![
            admin("acme-admin", "acme", "admin@acme.test"),
            admin("acme-admin-2", "acme", "second@acme.test"),
            admin("globex-admin", "globex", "admin@globex.test"),
        ],
        dev_cors_origin: None,
        listen_port: None,
    };
    config.validate().expect("valid config");

    let store = storage::Store::connect_sqlite(tmp_db.to_str().unwrap())
        .await
        .expect("db");
    store
        .seed_from_config(&config.companies, &config.users)
        .await
        .expect("seed");

    let state = server::AppState::new(config, store);
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Ok((addr, handle))
}

#[tokio::test]
async fn public_endpoints_and_authentication() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let health = server
        .request_expect("GET", ep::HEALTH, None, None, StatusCode::OK)
        .await;
    assert_eq!(health["raw"], "ok");

    server
        .request_expect(
            "POST",
            ep::AUTH_LOGIN,
            None,
            Some(json!({"email": "admin@acme.test", "password": "wrong"})),
            StatusCode::UNAUTHORIZED,
        )
        .await;
    server
        .request_expect(
            "POST",
            ep::TICKETS_BALANCE,
            None,
            Some(json!({"student_id": "x"})),
            StatusCode::UNAUTHORIZED,
        )
        .await;
    server
        .request_expect(
            "POST",
            ep::REWARDS_LIST,
            Some("not-a-jwt"),
            None,
            StatusCode::UNAUTHORIZED,
        )
        .await;

    let admin = server.access_token("admin@acme.test", ADMIN_PASSWORD).await;
    let get = server
        .request_expect("GET", ep::REWARDS_LIST, Some(&admin), None, StatusCode::METHOD_NOT_ALLOWED)
        .await;
    assert_eq!(get["error"], "method not allowed");
    let put = server
        .request_expect("PUT", ep::TICKETS_ADJUST, Some(&admin), None, StatusCode::METHOD_NOT_ALLOWED)
        .await;
    assert_eq!(put["error"], "method not allowed");
    let put = server
        .request_expect("PUT", ep::AUTH_LOGIN, None, None, StatusCode::METHOD_NOT_ALLOWED)
        .await;
    assert_eq!(put["error"], "method not allowed");
    let missing = server
        .request_expect("POST", "/api/v1/nope", Some(&admin), None, StatusCode::NOT_FOUND)
        .await;
    assert_eq!(missing["error"], "not found");
    let rewards = server
        .request_expect("POST", ep::REWARDS_LIST, Some(&admin), None, StatusCode::OK)
        .await;
    assert_eq!(rewards, json!([]));
}

#[tokio::test]
async fn task_award_redemption_round_trip_keeps_ledger_consistent() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.access_token("admin@acme.test", ADMIN_PASSWORD).await;
    let teacher_id = server.create_teacher(&admin, "tina@acme.test").await;
    let teacher = server.access_token("tina@acme.test", STAFF_PASSWORD).await;
    let student = server.create_student(&admin, &[&teacher_id]).await;
    let student_token = token_of(
        &server
            .pin_session(&teacher, &student, Role::Student, None)
            .await,
    );

    let task = server
        .completed_task(&teacher, &student_token, &student)
        .await;
    let verified = server
        .post(
            ep::TASKS_VERIFY,
            &teacher,
            json!({
                "assignment_id": task,
                "verification_status": "verified",
                "actual_points_awarded": 15,
            }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(verified["balance"], 15);
    assert_eq!(verified["task"]["verification_status"], "verified");
    assert_eq!(server.balance(&student_token, &student).await, 15);

    let adjusted = server.adjust(&admin, &student, 40).await;
    assert_eq!(adjusted["balance"], 55);

    let reward = server.create_reward(&admin, 20).await;
    let redeemed = server
        .post(
            ep::REWARDS_REDEEM,
            &admin,
            json!({"student_id": student, "reward_id": reward}),
            StatusCode::OK,
        )
        .await;
    assert_eq!(redeemed["balance"], 35);

    let rows = server.history(&admin, &student).await;
    assert_eq!(rows.len(), 3);
    assert_eq!(ledger_sum(&rows), server.balance(&admin, &student).await);
    // newest first
    assert_eq!(rows[0]["type"], "redemption");
    assert_eq!(rows[0]["source_id"], reward.as_str());
    assert_eq!(rows[1]["type"], "manual_add");
    assert_eq!(rows[2]["type"], "task_award");
    assert_eq!(rows[2]["source_id"], task.as_str());
}

#[tokio::test]
async fn second_verification_is_rejected_without_ledger_row() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.access_token("admin@acme.test", ADMIN_PASSWORD).await;
    let student = server.create_student(&admin, &[]).await;
    let student_token = token_of(&server.pin_session(&admin, &student, Role::Student, None).await);
    let task = server.completed_task(&admin, &student_token, &student).await;

    let body = json!({
        "assignment_id": task,
        "verification_status": "partial",
        "actual_points_awarded": 5,
    });
    server
        .post(ep::TASKS_VERIFY, &admin, body.clone(), StatusCode::OK)
        .await;
    let again = server
        .post(ep::TASKS_VERIFY, &admin, body, StatusCode::CONFLICT)
        .await;
    assert_eq!(again["code"], "not_pending");
    assert_eq!(server.history(&admin, &student).await.len(), 1);
    assert_eq!(server.balance(&admin, &student).await, 5);

    // Verified tasks cannot be deleted or completed again.
    let del = server
        .post(
            ep::TASKS_DELETE,
            &admin,
            json!({"assignment_id": task}),
            StatusCode::CONFLICT,
        )
        .await;
    assert_eq!(del["code"], "already_verified");
    let done = server
        .post(
            ep::TASKS_COMPLETE,
            &student_token,
            json!({"assignment_id": task}),
            StatusCode::CONFLICT,
        )
        .await;
    assert_eq!(done["code"], "already_complete");
}

#[tokio::test]
async fn verification_input_is_validated() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.access_token("admin@acme.test", ADMIN_PASSWORD).await;
    let student = server.create_student(&admin, &[]).await;
    let student_token = token_of(&server.pin_session(&admin, &student, Role::Student, None).await);
    let task = server.completed_task(&admin, &student_token, &student).await;

    for (status, points) in [("incomplete", 3), ("verified", -1), ("pending", 0)] {
        server
            .post(
                ep::TASKS_VERIFY,
                &admin,
                json!({
                    "assignment_id": task,
                    "verification_status": status,
                    "actual_points_awarded": points,
                }),
                StatusCode::BAD_REQUEST,
            )
            .await;
    }
    let zero = server
        .post(
            ep::TASKS_VERIFY,
            &admin,
            json!({
                "assignment_id": task,
                "verification_status": "incomplete",
                "actual_points_awarded": 0,
            }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(zero["transaction_id"], Value::Null);
    assert!(server.history(&admin, &student).await.is_empty());
}

#[tokio::test]
async fn concurrent_redemptions_never_overdraw() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.access_token("admin@acme.test", ADMIN_PASSWORD).await;
    let student = server.create_student(&admin, &[]).await;
    server.adjust(&admin, &student, 50).await;
    let reward = server.create_reward(&admin, 50).await;

    let body = json!({"student_id": student, "reward_id": reward});
    let (a, b) = futures::join!(
        server.request("POST", ep::REWARDS_REDEEM, Some(&admin), Some(body.clone())),
        server.request("POST", ep::REWARDS_REDEEM, Some(&admin), Some(body.clone())),
    );
    let mut statuses = [a.0, b.0];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);
    let rejected = if a.0 == StatusCode::CONFLICT { a.1 } else { b.1 };
    assert_eq!(rejected["code"], "insufficient_balance");
    assert_eq!(rejected["balance"], 0);

    assert_eq!(server.balance(&admin, &student).await, 0);
    let rows = server.history(&admin, &student).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(ledger_sum(&rows), 0);
}

#[tokio::test]
async fn manual_debit_cannot_go_negative() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.access_token("admin@acme.test", ADMIN_PASSWORD).await;
    let student = server.create_student(&admin, &[]).await;
    server.adjust(&admin, &student, 10).await;

    let refused = server
        .post(
            ep::TICKETS_ADJUST,
            &admin,
            json!({"student_id": student, "amount": -11}),
            StatusCode::CONFLICT,
        )
        .await;
    assert_eq!(refused["code"], "insufficient_balance");
    assert_eq!(refused["balance"], 10);
    server
        .post(
            ep::TICKETS_ADJUST,
            &admin,
            json!({"student_id": student, "amount": 0}),
            StatusCode::BAD_REQUEST,
        )
        .await;

    // Pages far past the end are rejected, not wrapped.
    let err = server
        .post(
            ep::TICKETS_HISTORY,
            &admin,
            json!({"student_id": student, "page": 4611686018427387904u64, "per_page": 1000}),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(err["error"], "page out of range");
    let beyond = server
        .post(
            ep::TICKETS_HISTORY,
            &admin,
            json!({"student_id": student, "page": 50}),
            StatusCode::OK,
        )
        .await;
    assert_eq!(beyond, json!([]));

    let ok = server.adjust(&admin, &student, -10).await;
    assert_eq!(ok["balance"], 0);
    let rows = server.history(&admin, &student).await;
    assert_eq!(rows[0]["type"], "manual_subtract");
    assert_eq!(rows[0]["source_id"], "acme-admin");
}

#[tokio::test]
async fn pins_are_single_use() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.access_token("admin@acme.test", ADMIN_PASSWORD).await;
    let student = server.create_student(&admin, &[]).await;
    let pin = server
        .post(
            ep::PINS_GENERATE,
            &admin,
            json!({"target_user_id": student, "target_role": "student"}),
            StatusCode::OK,
        )
        .await;
    let pin = pin["pin"].as_str().unwrap().to_string();
    assert_eq!(pin.len(), 6);

    let session = server
        .request_expect(
            "POST",
            ep::PINS_CLAIM,
            None,
            Some(json!({"pin": pin})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(session["role"], "student");
    assert_eq!(session["user_id"], student.as_str());

    let again = server
        .request_expect(
            "POST",
            ep::PINS_CLAIM,
            None,
            Some(json!({"pin": pin})),
            StatusCode::UNAUTHORIZED,
        )
        .await;
    assert_eq!(again["error"], "invalid or expired pin");

    // Concurrent claims of a fresh pin: exactly one wins.
    let pin = server
        .post(
            ep::PINS_GENERATE,
            &admin,
            json!({"target_user_id": student, "target_role": "student"}),
            StatusCode::OK,
        )
        .await;
    let body = json!({"pin": pin["pin"]});
    let (a, b) = futures::join!(
        server.request("POST", ep::PINS_CLAIM, None, Some(body.clone())),
        server.request("POST", ep::PINS_CLAIM, None, Some(body.clone())),
    );
    let mut statuses = [a.0, b.0];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::UNAUTHORIZED]);

    // Role must match the target.
    server
        .post(
            ep::PINS_GENERATE,
            &admin,
            json!({"target_user_id": student, "target_role": "parent"}),
            StatusCode::BAD_REQUEST,
        )
        .await;
}

#[tokio::test]
async fn parent_sessions_are_bound_to_one_student() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.access_token("admin@acme.test", ADMIN_PASSWORD).await;
    let kid = server.create_student(&admin, &[]).await;
    let other_kid = server.create_student(&admin, &[]).await;
    let parent = server
        .create_user(
            &admin,
            json!({
                "role": "parent",
                "first_name": "Pat",
                "last_name": "Parent",
                "student_ids": [kid, other_kid],
            }),
        )
        .await;

    server
        .post(
            ep::PINS_GENERATE,
            &admin,
            json!({"target_user_id": parent, "target_role": "parent"}),
            StatusCode::BAD_REQUEST,
        )
        .await;

    let session = server
        .pin_session(&admin, &parent, Role::Parent, Some(&kid))
        .await;
    assert_eq!(session["viewing_student_id"], kid.as_str());
    let parent_token = token_of(&session);

    assert_eq!(server.balance(&parent_token, &kid).await, 0);
    server
        .post(
            ep::TICKETS_BALANCE,
            &parent_token,
            json!({"student_id": other_kid}),
            StatusCode::FORBIDDEN,
        )
        .await;

    // Parents log practice for the student they are viewing.
    let logged = server
        .post(ep::PRACTICE_LOG, &parent_token, json!({}), StatusCode::OK)
        .await;
    assert_eq!(logged["student_id"], kid.as_str());
    assert_eq!(logged["streak"], 1);
}

#[tokio::test]
async fn companies_are_isolated() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let acme = server.access_token("admin@acme.test", ADMIN_PASSWORD).await;
    let globex = server.access_token("admin@globex.test", ADMIN_PASSWORD).await;
    let student = server.create_student(&acme, &[]).await;
    server.adjust(&acme, &student, 30).await;
    let reward = server.create_reward(&acme, 10).await;
    let globex_reward = server.create_reward(&globex, 10).await;

    for path in [ep::TICKETS_BALANCE, ep::TICKETS_HISTORY, ep::TASKS_LIST, ep::PRACTICE_STREAK] {
        server
            .post(path, &globex, json!({"student_id": student}), StatusCode::NOT_FOUND)
            .await;
    }
    server
        .post(
            ep::TICKETS_ADJUST,
            &globex,
            json!({"student_id": student, "amount": 5}),
            StatusCode::NOT_FOUND,
        )
        .await;
    server
        .post(
            ep::REWARDS_REDEEM,
            &globex,
            json!({"student_id": student, "reward_id": reward}),
            StatusCode::NOT_FOUND,
        )
        .await;
    // A reward of another company is just as invisible.
    server
        .post(
            ep::REWARDS_REDEEM,
            &acme,
            json!({"student_id": student, "reward_id": globex_reward}),
            StatusCode::NOT_FOUND,
        )
        .await;
    server
        .post(
            ep::USERS_TOGGLE_STATUS,
            &globex,
            json!({"user_id": student, "status": "inactive"}),
            StatusCode::NOT_FOUND,
        )
        .await;

    let listed = server
        .request_expect("POST", ep::REWARDS_LIST, Some(&globex), None, StatusCode::OK)
        .await;
    let ids: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["id"].as_str())
        .collect();
    assert_eq!(ids, vec![globex_reward.as_str()]);
    assert_eq!(server.balance(&acme, &student).await, 30);
}

#[tokio::test]
async fn teachers_only_reach_linked_students() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.access_token("admin@acme.test", ADMIN_PASSWORD).await;
    let linked_id = server.create_teacher(&admin, "linked@acme.test").await;
    let other_id = server.create_teacher(&admin, "other@acme.test").await;
    let linked = server.access_token("linked@acme.test", STAFF_PASSWORD).await;
    let other = server.access_token("other@acme.test", STAFF_PASSWORD).await;
    let student = server.create_student(&admin, &[&linked_id]).await;
    let student_token = token_of(&server.pin_session(&linked, &student, Role::Student, None).await);

    server
        .post(
            ep::TASKS_ASSIGN,
            &other,
            json!({"student_id": student, "title": "Arpeggios", "points": 5}),
            StatusCode::FORBIDDEN,
        )
        .await;
    server
        .post(
            ep::PINS_GENERATE,
            &other,
            json!({"target_user_id": student, "target_role": "student"}),
            StatusCode::FORBIDDEN,
        )
        .await;

    let task = server.completed_task(&linked, &student_token, &student).await;
    server
        .post(
            ep::TASKS_VERIFY,
            &other,
            json!({
                "assignment_id": task,
                "verification_status": "verified",
                "actual_points_awarded": 15,
            }),
            StatusCode::FORBIDDEN,
        )
        .await;
    server
        .post(
            ep::TICKETS_BALANCE,
            &other,
            json!({"student_id": student}),
            StatusCode::FORBIDDEN,
        )
        .await;
    // Only admins adjust balances.
    server
        .post(
            ep::TICKETS_ADJUST,
            &linked,
            json!({"student_id": student, "amount": 5}),
            StatusCode::FORBIDDEN,
        )
        .await;
    assert!(server.history(&admin, &student).await.is_empty());

    // Once linked, the other teacher can verify too.
    let updated = server
        .post(
            ep::USERS_UPDATE,
            &admin,
            json!({"user_id": student, "teacher_ids": [linked_id, other_id]}),
            StatusCode::OK,
        )
        .await;
    assert_eq!(updated["teacher_ids"].as_array().unwrap().len(), 2);
    let verified = server
        .post(
            ep::TASKS_VERIFY,
            &other,
            json!({
                "assignment_id": task,
                "verification_status": "verified",
                "actual_points_awarded": 15,
            }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(verified["balance"], 15);

    // Teachers cannot link a new student to anyone else.
    server
        .post(
            ep::USERS_CREATE,
            &other,
            json!({
                "role": "student",
                "first_name": "Nia",
                "last_name": "Nolink",
                "teacher_ids": [linked_id],
            }),
            StatusCode::FORBIDDEN,
        )
        .await;

    // A student created by a teacher is linked to them.
    let own = server
        .create_user(
            &other,
            json!({"role": "student", "first_name": "Olly", "last_name": "Own"}),
        )
        .await;
    assert_eq!(server.balance(&other, &own).await, 0);
}

#[tokio::test]
async fn inactive_users_are_gated() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.access_token("admin@acme.test", ADMIN_PASSWORD).await;
    let student = server.create_student(&admin, &[]).await;
    server.adjust(&admin, &student, 20).await;
    let reward = server.create_reward(&admin, 5).await;
    let session = server.pin_session(&admin, &student, Role::Student, None).await;
    let refresh = session["refresh_token"].as_str().unwrap().to_string();

    let user = server
        .post(
            ep::USERS_TOGGLE_STATUS,
            &admin,
            json!({"user_id": student, "status": "inactive"}),
            StatusCode::OK,
        )
        .await;
    assert_eq!(user["status"], "inactive");

    let err = server
        .post(
            ep::TASKS_ASSIGN,
            &admin,
            json!({"student_id": student, "title": "Etude", "points": 3}),
            StatusCode::FORBIDDEN,
        )
        .await;
    assert_eq!(err["error"], "student is not active");
    server
        .post(
            ep::REWARDS_REDEEM,
            &admin,
            json!({"student_id": student, "reward_id": reward}),
            StatusCode::FORBIDDEN,
        )
        .await;
    server
        .post(
            ep::PINS_GENERATE,
            &admin,
            json!({"target_user_id": student, "target_role": "student"}),
            StatusCode::FORBIDDEN,
        )
        .await;
    // Deactivation revoked the student's refresh tokens.
    server
        .request_expect(
            "POST",
            ep::AUTH_REFRESH,
            None,
            Some(json!({"refresh_token": refresh})),
            StatusCode::UNAUTHORIZED,
        )
        .await;
    // Balance stays readable for staff.
    assert_eq!(server.balance(&admin, &student).await, 20);

    server
        .post(
            ep::USERS_TOGGLE_STATUS,
            &admin,
            json!({"user_id": "acme-admin", "status": "inactive"}),
            StatusCode::BAD_REQUEST,
        )
        .await;
}

#[tokio::test]
async fn refresh_tokens_rotate_and_can_be_revoked() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let first = server.login("admin@acme.test", ADMIN_PASSWORD).await;
    assert_eq!(first["token_type"], "Bearer");
    assert_eq!(first["expires_in"], 3600);
    let old_refresh = first["refresh_token"].as_str().unwrap().to_string();

    let second = server
        .request_expect(
            "POST",
            ep::AUTH_REFRESH,
            None,
            Some(json!({"refresh_token": old_refresh})),
            StatusCode::OK,
        )
        .await;
    let new_refresh = second["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(new_refresh, old_refresh);
    assert_eq!(second["user_id"], "acme-admin");

    server
        .request_expect(
            "POST",
            ep::AUTH_REFRESH,
            None,
            Some(json!({"refresh_token": old_refresh})),
            StatusCode::UNAUTHORIZED,
        )
        .await;

    server
        .request_expect(
            "POST",
            ep::AUTH_LOGOUT,
            None,
            Some(json!({"refresh_token": new_refresh})),
            StatusCode::OK,
        )
        .await;
    server
        .request_expect(
            "POST",
            ep::AUTH_REFRESH,
            None,
            Some(json!({"refresh_token": new_refresh})),
            StatusCode::UNAUTHORIZED,
        )
        .await;
}

#[tokio::test]
async fn force_logout_revokes_every_session() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.access_token("admin@acme.test", ADMIN_PASSWORD).await;
    let a = server.login("second@acme.test", ADMIN_PASSWORD).await;
    let b = server.login("second@acme.test", ADMIN_PASSWORD).await;

    let resp = server
        .post(
            ep::AUTH_FORCE_LOGOUT,
            &admin,
            json!({"target_user_id": "acme-admin-2"}),
            StatusCode::OK,
        )
        .await;
    assert_eq!(resp["revoked_sessions"], 2);
    for session in [a, b] {
        server
            .request_expect(
                "POST",
                ep::AUTH_REFRESH,
                None,
                Some(json!({"refresh_token": session["refresh_token"]})),
                StatusCode::UNAUTHORIZED,
            )
            .await;
    }

    let globex = server.access_token("admin@globex.test", ADMIN_PASSWORD).await;
    server
        .post(
            ep::AUTH_FORCE_LOGOUT,
            &globex,
            json!({"target_user_id": "acme-admin"}),
            StatusCode::NOT_FOUND,
        )
        .await;
}

#[tokio::test]
async fn practice_is_logged_once_per_day() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.access_token("admin@acme.test", ADMIN_PASSWORD).await;
    let student = server.create_student(&admin, &[]).await;
    let token = token_of(&server.pin_session(&admin, &student, Role::Student, None).await);

    // The test config makes every day a milestone.
    let logged = server
        .post(ep::PRACTICE_LOG, &token, json!({}), StatusCode::OK)
        .await;
    assert_eq!(logged["streak"], 1);
    assert_eq!(logged["streak_award"], 10);
    assert_eq!(logged["balance"], 10);

    let again = server
        .post(ep::PRACTICE_LOG, &token, json!({}), StatusCode::CONFLICT)
        .await;
    assert_eq!(again["code"], "already_logged_today");

    let streak = server
        .post(
            ep::PRACTICE_STREAK,
            &admin,
            json!({"student_id": student}),
            StatusCode::OK,
        )
        .await;
    assert_eq!(streak["streak"], 1);
    assert_eq!(streak["last_logged"], logged["log_date"]);

    let rows = server.history(&admin, &student).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["type"], "streak_award");

    // Staff cannot log practice on a student's behalf.
    server
        .post(
            ep::PRACTICE_LOG,
            &admin,
            json!({"student_id": student}),
            StatusCode::FORBIDDEN,
        )
        .await;
}

#[tokio::test]
async fn user_administration() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.access_token("admin@acme.test", ADMIN_PASSWORD).await;
    let teacher = server.create_teacher(&admin, "tina@acme.test").await;

    // Duplicate email
    let dup = server
        .post(
            ep::USERS_CREATE,
            &admin,
            json!({
                "role": "teacher",
                "first_name": "Tom",
                "last_name": "Twin",
                "email": "TINA@acme.test",
                "password": STAFF_PASSWORD,
            }),
            StatusCode::CONFLICT,
        )
        .await;
    assert_eq!(dup["code"], "email_taken");

    // Teachers need credentials; links must match the role.
    server
        .post(
            ep::USERS_CREATE,
            &admin,
            json!({"role": "teacher", "first_name": "No", "last_name": "Pass"}),
            StatusCode::BAD_REQUEST,
        )
        .await;
    server
        .post(
            ep::USERS_CREATE,
            &admin,
            json!({
                "role": "student",
                "first_name": "Bad",
                "last_name": "Link",
                "teacher_ids": ["acme-admin"],
            }),
            StatusCode::BAD_REQUEST,
        )
        .await;

    let student = server
        .post(
            ep::USERS_CREATE,
            &admin,
            json!({
                "role": "student",
                "first_name": "Sam",
                "last_name": "Student",
                "teacher_ids": [teacher],
                "instrument_ids": ["acme-piano"],
            }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(student["teacher_ids"], json!([teacher]));
    assert_eq!(student["instrument_ids"], json!(["acme-piano"]));
    let student = id_of(&student);

    let updated = server
        .post(
            ep::USERS_UPDATE,
            &admin,
            json!({"user_id": student, "first_name": "Samantha", "teacher_ids": []}),
            StatusCode::OK,
        )
        .await;
    assert_eq!(updated["first_name"], "Samantha");
    assert_eq!(updated["teacher_ids"], json!([]));
    assert_eq!(updated["instrument_ids"], json!(["acme-piano"]));

    let del = server
        .post(
            ep::USERS_DELETE,
            &admin,
            json!({"user_id": "acme-admin"}),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(del["code"], "self_action");

    server.adjust(&admin, &student, 7).await;
    server
        .post(
            ep::USERS_DELETE,
            &admin,
            json!({"user_id": student}),
            StatusCode::OK,
        )
        .await;
    server
        .post(
            ep::TICKETS_BALANCE,
            &admin,
            json!({"student_id": student}),
            StatusCode::NOT_FOUND,
        )
        .await;
}

#[tokio::test]
async fn library_tasks_and_self_assignment() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let admin = server.access_token("admin@acme.test", ADMIN_PASSWORD).await;
    let linked_id = server.create_teacher(&admin, "linked@acme.test").await;
    server.create_teacher(&admin, "other@acme.test").await;
    let linked = server.access_token("linked@acme.test", STAFF_PASSWORD).await;
    let other = server.access_token("other@acme.test", STAFF_PASSWORD).await;
    let student = server.create_student(&admin, &[&linked_id]).await;
    let parent = server
        .create_user(
            &admin,
            json!({
                "role": "parent",
                "first_name": "Pat",
                "last_name": "Parent",
                "student_ids": [student],
            }),
        )
        .await;
    let student_token = token_of(&server.pin_session(&linked, &student, Role::Student, None).await);
    let parent_token = token_of(
        &server
            .pin_session(&linked, &parent, Role::Parent, Some(&student))
            .await,
    );

    let open = server
        .post(
            ep::TASKS_LIBRARY_CREATE,
            &linked,
            json!({
                "title": "  Sight reading  ",
                "description": "Two pages",
                "points": 12,
                "can_self_assign": true,
                "attachment_path": "sheets/sight.pdf",
            }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(open["title"], "Sight reading");
    let open_id = id_of(&open);
    let closed = server
        .post(
            ep::TASKS_LIBRARY_CREATE,
            &admin,
            json!({"title": "Recital piece", "points": 40}),
            StatusCode::OK,
        )
        .await;
    assert_eq!(closed["can_self_assign"], false);
    let closed_id = id_of(&closed);
    server
        .post(
            ep::TASKS_LIBRARY_CREATE,
            &student_token,
            json!({"title": "Free play", "points": 100}),
            StatusCode::FORBIDDEN,
        )
        .await;

    // The student picks an open library task; it is a snapshot of the item.
    let own = server
        .post(
            ep::TASKS_ASSIGN,
            &student_token,
            json!({"student_id": student, "task_library_id": open_id}),
            StatusCode::OK,
        )
        .await;
    assert_eq!(own["task_library_id"], open_id.as_str());
    assert_eq!(own["assigned_by_id"], student.as_str());
    assert_eq!(own["title"], "Sight reading");
    assert_eq!(own["description"], "Two pages");
    assert_eq!(own["points"], 12);
    assert_eq!(own["attachment_path"], "sheets/sight.pdf");
    assert_eq!(own["verification_status"], Value::Null);
    let own_id = id_of(&own);

    // So can a parent session for the student it views.
    let by_parent = server
        .post(
            ep::TASKS_ASSIGN,
            &parent_token,
            json!({"student_id": student, "task_library_id": open_id}),
            StatusCode::OK,
        )
        .await;
    assert_eq!(by_parent["assigned_by_id"], parent.as_str());
    let by_parent_id = id_of(&by_parent);

    // Closed library items and ad-hoc tasks stay with staff.
    server
        .post(
            ep::TASKS_ASSIGN,
            &student_token,
            json!({"student_id": student, "task_library_id": closed_id}),
            StatusCode::FORBIDDEN,
        )
        .await;
    server
        .post(
            ep::TASKS_ASSIGN,
            &parent_token,
            json!({"student_id": student, "title": "Anything", "points": 99}),
            StatusCode::FORBIDDEN,
        )
        .await;

    // Staff assignment from the library and deletion by the assigner.
    let staff_task = server
        .post(
            ep::TASKS_ASSIGN,
            &linked,
            json!({"student_id": student, "task_library_id": closed_id}),
            StatusCode::OK,
        )
        .await;
    assert_eq!(staff_task["points"], 40);
    server
        .post(
            ep::TASKS_DELETE,
            &linked,
            json!({"assignment_id": id_of(&staff_task)}),
            StatusCode::OK,
        )
        .await;

    // Self-assigned tasks: an unrelated teacher cannot remove them, the
    // student's own teacher can.
    for id in [&own_id, &by_parent_id] {
        server
            .post(
                ep::TASKS_DELETE,
                &other,
                json!({"assignment_id": id}),
                StatusCode::FORBIDDEN,
            )
            .await;
        server
            .post(
                ep::TASKS_DELETE,
                &linked,
                json!({"assignment_id": id}),
                StatusCode::OK,
            )
            .await;
    }

    let left = server
        .post(
            ep::TASKS_LIST,
            &student_token,
            json!({"student_id": student}),
            StatusCode::OK,
        )
        .await;
    assert_eq!(left, json!([]));
}

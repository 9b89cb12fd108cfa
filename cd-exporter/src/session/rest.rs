//! Connect:Direct Web Services backend.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, COOKIE, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use super::{JobListing, JobSource, SessionError};
use crate::config::RestSettings;
use crate::error::{Error, Result};

const SIGNON_PATH: &str = "cdwebconsole/svc/signon";
const SIGNOUT_PATH: &str = "cdwebconsole/svc/signout";
const PROCESS_QUERY_PATH: &str = "cdwebconsole/svc/processcontrolcriterias";

/// Fixed token Web Services expects on the very first request of a session.
const BOOTSTRAP_XSRF_TOKEN: &str = "Y2hlY2tpdA==";
const XSRF_HEADER: &str = "X-XSRF-TOKEN";
const CSRF_RESPONSE_HEADER: &str = "_csrf";
const JSON_UTF8: &str = "application/json; charset=utf-8";

/// Longest response body quoted in an error.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignonRequest<'a> {
    ip_address: &'a str,
    port: u16,
    protocol: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignoutRequest<'a> {
    user_access_token: &'a str,
}

/// Headers identifying one signed-on session.
#[derive(Debug)]
struct WebSession {
    authorization: HeaderValue,
    csrf: Option<HeaderValue>,
    cookie: Option<HeaderValue>,
}

/// Fetches the process queue through Web Services, one session per call.
#[derive(Debug, Clone)]
pub struct RestApiSource {
    settings: RestSettings,
    client: Client,
    signon_url: Url,
    signout_url: Url,
    query_url: Url,
}

impl RestApiSource {
    pub fn new(settings: RestSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(settings.request_timeout)
            .timeout(settings.request_timeout)
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .build()?;

        Ok(Self {
            signon_url: endpoint(&settings.server, SIGNON_PATH)?,
            signout_url: endpoint(&settings.server, SIGNOUT_PATH)?,
            query_url: endpoint(&settings.server, PROCESS_QUERY_PATH)?,
            settings,
            client,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> SessionError {
        if e.is_timeout() {
            SessionError::Timeout(self.settings.request_timeout)
        } else {
            SessionError::Connect(e)
        }
    }

    async fn signon(&self) -> std::result::Result<WebSession, SessionError> {
        let node = &self.settings.node;
        let body = SignonRequest {
            ip_address: &node.address,
            port: node.port,
            protocol: node.protocol.as_wire_str(),
        };

        let response = self
            .client
            .post(self.signon_url.clone())
            .basic_auth(&self.settings.user, Some(self.settings.password.expose()))
            .header(CONTENT_TYPE, JSON_UTF8)
            .header(XSRF_HEADER, BOOTSTRAP_XSRF_TOKEN)
            .header(CACHE_CONTROL, "no-cache")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let message = read_error_body(response).await;
            return Err(SessionError::Authentication {
                status: status.as_u16(),
                message,
            });
        }

        let headers = response.headers();
        let authorization = headers.get(AUTHORIZATION).cloned().ok_or_else(|| {
            SessionError::Protocol("signon response carried no authorization header".into())
        })?;
        let csrf = headers.get(CSRF_RESPONSE_HEADER).cloned();
        let cookie = session_cookie(headers);

        debug!(server = %self.settings.server, "Signed on to Web Services");
        Ok(WebSession {
            authorization,
            csrf,
            cookie,
        })
    }

    fn with_session(
        &self,
        request: reqwest::RequestBuilder,
        session: &WebSession,
    ) -> reqwest::RequestBuilder {
        let mut request = request
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, JSON_UTF8)
            .header(AUTHORIZATION, session.authorization.clone());
        if let Some(csrf) = &session.csrf {
            request = request.header(XSRF_HEADER, csrf.clone());
        }
        if let Some(cookie) = &session.cookie {
            request = request.header(COOKIE, cookie.clone());
        }
        request
    }

    async fn query_processes(
        &self,
        session: &WebSession,
    ) -> std::result::Result<JobListing, SessionError> {
        let request = self
            .client
            .get(self.query_url.clone())
            .query(&[("queue", "all")]);

        let response = self
            .with_session(request, session)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response).await;
            return Err(SessionError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;
        Ok(JobListing::from_output(body))
    }

    /// Best-effort signout; failures are logged only.
    async fn signout(&self, session: &WebSession) {
        let token = session.authorization.to_str().unwrap_or_default();
        let request = self
            .client
            .delete(self.signout_url.clone())
            .json(&SignoutRequest {
                user_access_token: token,
            });

        match self.with_session(request, session).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Signed out of Web Services");
            }
            Ok(response) => {
                let status = response.status();
                let body = read_error_body(response).await;
                warn!(status = status.as_u16(), body = %body, "Web Services signout failed");
            }
            Err(e) => {
                warn!(error = %e, "Web Services signout failed");
            }
        }
    }
}

#[async_trait]
impl JobSource for RestApiSource {
    fn describe(&self) -> String {
        let node = &self.settings.node;
        format!(
            "Web Services {} -> node {}:{} ({})",
            self.settings.server, node.address, node.port, node.protocol
        )
    }

    async fn fetch_job_listing(&self) -> std::result::Result<JobListing, SessionError> {
        let session = self.signon().await?;
        let result = self.query_processes(&session).await;
        self.signout(&session).await;
        result
    }
}

/// Append `path` to the base URL's path, keeping any prefix the base has.
fn endpoint(base: &Url, path: &str) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| Error::Other(format!("{base} cannot be used as a base URL")))?
        .pop_if_empty()
        .extend(path.split('/'));
    Ok(url)
}

/// Collapse every `Set-Cookie` into a single `Cookie` header value.
fn session_cookie(headers: &reqwest::header::HeaderMap) -> Option<HeaderValue> {
    let pairs: Vec<&str> = headers
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .collect();

    if pairs.is_empty() {
        return None;
    }
    HeaderValue::from_str(&pairs.join("; ")).ok()
}

async fn read_error_body(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    if body.chars().count() > MAX_ERROR_BODY {
        let truncated: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!("{truncated}...")
    } else {
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NodeTarget, Secret, TransportProtocol};
    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// `admin:secret` in Basic auth form.
    const EXPECTED_BASIC: &str = "Basic YWRtaW46c2VjcmV0";

    struct FakeWebServices {
        listing_status: AxumStatus,
        listing: String,
        query_delay: Duration,
        signons: AtomicUsize,
        queries: AtomicUsize,
        signouts: AtomicUsize,
        last_signon_body: parking_lot::Mutex<Option<serde_json::Value>>,
    }

    impl FakeWebServices {
        fn new(listing_status: AxumStatus, listing: &str) -> Arc<Self> {
            Self::with_delay(listing_status, listing, Duration::ZERO)
        }

        fn with_delay(listing_status: AxumStatus, listing: &str, query_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                listing_status,
                listing: listing.to_string(),
                query_delay,
                signons: AtomicUsize::new(0),
                queries: AtomicUsize::new(0),
                signouts: AtomicUsize::new(0),
                last_signon_body: parking_lot::Mutex::new(None),
            })
        }
    }

    async fn signon_handler(
        State(state): State<Arc<FakeWebServices>>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> impl IntoResponse {
        state.signons.fetch_add(1, Ordering::SeqCst);
        *state.last_signon_body.lock() = Some(body);

        let authorized = headers.get("authorization").and_then(|v| v.to_str().ok())
            == Some(EXPECTED_BASIC);
        let bootstrap = headers.get("x-xsrf-token").and_then(|v| v.to_str().ok())
            == Some(BOOTSTRAP_XSRF_TOKEN);
        if !authorized || !bootstrap {
            return (
                AxumStatus::UNAUTHORIZED,
                [("content-type", "application/json")],
                r#"{"message":"invalid credentials"}"#,
            )
                .into_response();
        }

        let mut response = AxumStatus::OK.into_response();
        let h = response.headers_mut();
        h.insert("authorization", "Bearer session-token".parse().unwrap());
        h.insert("_csrf", "csrf-1".parse().unwrap());
        h.append("set-cookie", "JSESSIONID=abc; Path=/; Secure".parse().unwrap());
        h.append("set-cookie", "XSRF-TOKEN=csrf-1; Path=/".parse().unwrap());
        response
    }

    async fn query_handler(
        State(state): State<Arc<FakeWebServices>>,
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
    ) -> impl IntoResponse {
        state.queries.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(state.query_delay).await;

        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("");
        if header("authorization") != "Bearer session-token"
            || header("x-xsrf-token") != "csrf-1"
            || header("cookie") != "JSESSIONID=abc; XSRF-TOKEN=csrf-1"
            || query.get("queue").map(String::as_str) != Some("all")
        {
            return (AxumStatus::FORBIDDEN, "bad session".to_string()).into_response();
        }
        (state.listing_status, state.listing.clone()).into_response()
    }

    async fn signout_handler(State(state): State<Arc<FakeWebServices>>) -> AxumStatus {
        state.signouts.fetch_add(1, Ordering::SeqCst);
        AxumStatus::OK
    }

    async fn spawn_fake(state: Arc<FakeWebServices>) -> SocketAddr {
        let app = Router::new()
            .route("/cdwebconsole/svc/signon", post(signon_handler))
            .route("/cdwebconsole/svc/processcontrolcriterias", get(query_handler))
            .route("/cdwebconsole/svc/signout", delete(signout_handler))
            .with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn settings(addr: SocketAddr, password: &str) -> RestSettings {
        RestSettings {
            server: Url::parse(&format!("http://{addr}")).unwrap(),
            user: "admin".to_string(),
            password: Secret::new(password),
            node: NodeTarget {
                address: "192.168.1.13".to_string(),
                port: 1363,
                protocol: TransportProtocol::Tls12,
            },
            accept_invalid_certs: false,
            request_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_fetch_runs_full_session() {
        let fake = FakeWebServices::new(
            AxumStatus::OK,
            r#"[{"processName":"P1","queue":"EXEC"},{"processName":"P2","queue":"HOLD"}]"#,
        );
        let addr = spawn_fake(fake.clone()).await;
        let source = RestApiSource::new(settings(addr, "secret")).unwrap();

        let listing = source.fetch_job_listing().await.unwrap();

        let JobListing::Raw(body) = listing else {
            panic!("expected raw listing");
        };
        assert!(body.contains("EXEC"));
        assert_eq!(fake.signons.load(Ordering::SeqCst), 1);
        assert_eq!(fake.queries.load(Ordering::SeqCst), 1);
        assert_eq!(fake.signouts.load(Ordering::SeqCst), 1);

        let signon = fake.last_signon_body.lock().clone().unwrap();
        assert_eq!(signon["ipAddress"], "192.168.1.13");
        assert_eq!(signon["port"], 1363);
        assert_eq!(signon["protocol"], "TLS1.2");
    }

    #[tokio::test]
    async fn test_empty_listing_is_no_data() {
        let fake = FakeWebServices::new(AxumStatus::OK, "");
        let addr = spawn_fake(fake.clone()).await;
        let source = RestApiSource::new(settings(addr, "secret")).unwrap();

        assert_eq!(source.fetch_job_listing().await.unwrap(), JobListing::NoData);
        assert_eq!(fake.signouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_signon() {
        let fake = FakeWebServices::new(AxumStatus::OK, "HOLD");
        let addr = spawn_fake(fake.clone()).await;
        let source = RestApiSource::new(settings(addr, "wrong")).unwrap();

        let err = source.fetch_job_listing().await.unwrap_err();

        match err {
            SessionError::Authentication { status, message } => {
                assert_eq!(status, 401);
                assert!(message.contains("invalid credentials"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fake.queries.load(Ordering::SeqCst), 0);
        assert_eq!(fake.signouts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_query_still_signs_out() {
        let fake = FakeWebServices::new(AxumStatus::INTERNAL_SERVER_ERROR, "queue unavailable");
        let addr = spawn_fake(fake.clone()).await;
        let source = RestApiSource::new(settings(addr, "secret")).unwrap();

        let err = source.fetch_job_listing().await.unwrap_err();

        assert!(matches!(err, SessionError::Http { status: 500, .. }));
        assert_eq!(fake.signouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_query_times_out() {
        let fake = FakeWebServices::with_delay(AxumStatus::OK, "HOLD", Duration::from_secs(3));
        let addr = spawn_fake(fake.clone()).await;
        let mut settings = settings(addr, "secret");
        settings.request_timeout = Duration::from_millis(300);
        let source = RestApiSource::new(settings).unwrap();

        let err = source.fetch_job_listing().await.unwrap_err();

        assert!(matches!(err, SessionError::Timeout(_)), "got {err:?}");
        assert_eq!(fake.signouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = RestApiSource::new(settings(addr, "secret")).unwrap();
        let err = source.fetch_job_listing().await.unwrap_err();

        assert!(matches!(err, SessionError::Connect(_)), "got {err:?}");
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let base = Url::parse("https://cdws.example:9443/").unwrap();
        assert_eq!(
            endpoint(&base, SIGNON_PATH).unwrap().as_str(),
            "https://cdws.example:9443/cdwebconsole/svc/signon"
        );

        let prefixed = Url::parse("https://gateway.example/cd").unwrap();
        assert_eq!(
            endpoint(&prefixed, PROCESS_QUERY_PATH).unwrap().as_str(),
            "https://gateway.example/cd/cdwebconsole/svc/processcontrolcriterias"
        );
    }

    #[test]
    fn test_describe_hides_password() {
        let source = RestApiSource::new(settings("127.0.0.1:9443".parse().unwrap(), "secret"))
            .unwrap();
        let description = source.describe();
        assert!(description.contains("192.168.1.13:1363"));
        assert!(!description.contains("secret"));
    }
}

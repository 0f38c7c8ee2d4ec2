use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::catalog::api_types::{ApiFalla, ApiResponse, PaginatedResponse};
use crate::catalog::error::FetchError;
use crate::catalog::types::Falla;
use crate::config::ApiConfig;

const FALLAS_PATH: &str = "api/fallas";

/// The two remote reads the orchestrator depends on.
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
  /// One page of the catalog. Cursoring across pages is up to the caller.
  async fn fetch_all(&self, page: u32, page_size: u32) -> Result<Vec<Falla>, FetchError>;

  /// `Ok(None)` means the service answered cleanly that no such falla exists.
  async fn fetch_by_id(&self, id: i64) -> Result<Option<Falla>, FetchError>;
}

/// HTTP client for the catalog service.
/// Clone is cheap - reqwest::Client and the token slot are shared.
#[derive(Clone)]
pub struct CatalogClient {
  http: Client,
  base_url: Url,
  token: Arc<RwLock<Option<String>>>,
}

impl CatalogClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let mut base_url = Url::parse(&config.url)
      .map_err(|e| eyre!("Invalid catalog URL '{}': {}", config.url, e))?;
    // Url::join drops the last segment unless the base ends with '/'
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let http = Client::builder()
      .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
      .timeout(Duration::from_secs(config.read_timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      token: Arc::new(RwLock::new(None)),
    })
  }

  /// Hand over the bearer token owned by the auth collaborator. Not validated.
  pub fn set_token(&self, token: Option<String>) {
    if let Ok(mut slot) = self.token.write() {
      *slot = token;
    }
  }

  fn token(&self) -> Option<String> {
    self.token.read().ok().and_then(|t| t.clone())
  }

  fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
    self
      .base_url
      .join(path)
      .map_err(|e| FetchError::Unreachable(format!("bad endpoint {}: {}", path, e)))
  }

  fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
    match self.token() {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }

  /// Send and return status plus body. Non-2xx statuses are left to the caller.
  async fn send(&self, request: RequestBuilder) -> Result<(StatusCode, Vec<u8>), FetchError> {
    let response = self
      .authorize(request)
      .send()
      .await
      .map_err(FetchError::from_reqwest)?;

    let status = response.status();
    let body = response.bytes().await.map_err(FetchError::from_reqwest)?;
    Ok((status, body.to_vec()))
  }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<ApiResponse<T>, FetchError> {
  serde_json::from_slice(body).map_err(FetchError::malformed)
}

fn rejected(status: StatusCode, body: &[u8]) -> FetchError {
  FetchError::from_status(status, &String::from_utf8_lossy(body))
}

#[async_trait]
impl RemoteCatalog for CatalogClient {
  async fn fetch_all(&self, page: u32, page_size: u32) -> Result<Vec<Falla>, FetchError> {
    let url = self.endpoint(FALLAS_PATH)?;
    let request = self
      .http
      .get(url)
      .query(&[("pagina", page), ("tamano", page_size)]);

    let (status, body) = self.send(request).await?;
    if !status.is_success() {
      return Err(rejected(status, &body));
    }

    let page_data = decode::<PaginatedResponse<ApiFalla>>(&body)?.into_required(status)?;
    let synced_at = Utc::now().trunc_subsecs(3);
    debug!(
      page,
      count = page_data.contenido.len(),
      total = page_data.total_elementos,
      "Fetched catalog page"
    );

    Ok(
      page_data
        .contenido
        .into_iter()
        .map(|f| f.into_falla(synced_at))
        .collect(),
    )
  }

  async fn fetch_by_id(&self, id: i64) -> Result<Option<Falla>, FetchError> {
    let url = self.endpoint(&format!("{}/{}", FALLAS_PATH, id))?;
    let (status, body) = self.send(self.http.get(url)).await?;

    if status == StatusCode::NOT_FOUND {
      debug!(id, "Falla not found remotely");
      return Ok(None);
    }
    if !status.is_success() {
      return Err(rejected(status, &body));
    }

    let falla = decode::<ApiFalla>(&body)?.into_optional(status)?;
    let synced_at = Utc::now().trunc_subsecs(3);
    Ok(falla.map(|f| f.into_falla(synced_at)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;
  use tokio::sync::mpsc;

  /// Loopback server answering every connection with the same canned
  /// response after `delay`. Request heads are forwarded to the receiver.
  async fn serve(
    status: &'static str,
    body: &'static str,
    delay: Duration,
  ) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      loop {
        let Ok((mut socket, _)) = listener.accept().await else {
          return;
        };
        let tx = tx.clone();
        tokio::spawn(async move {
          let mut head = Vec::new();
          let mut buf = [0u8; 1024];
          while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf).await {
              Ok(0) | Err(_) => return,
              Ok(n) => head.extend_from_slice(&buf[..n]),
            }
          }
          let _ = tx.send(String::from_utf8_lossy(&head).into_owned());

          tokio::time::sleep(delay).await;
          let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
          );
          let _ = socket.write_all(response.as_bytes()).await;
          let _ = socket.shutdown().await;
        });
      }
    });

    (url, rx)
  }

  async fn client_for(status: &'static str, body: &'static str) -> CatalogClient {
    let (url, _) = serve(status, body, Duration::ZERO).await;
    CatalogClient::new(&config(&url)).unwrap()
  }

  const FALLA_BODY: &str =
    r#"{"exito":true,"mensaje":null,"datos":{"idFalla":3,"nombre":"X","seccion":"1A"},"timestamp":"2025-03-01T10:00:00"}"#;

  fn config(url: &str) -> ApiConfig {
    ApiConfig {
      url: url.to_string(),
      ..ApiConfig::default()
    }
  }

  #[test]
  fn test_endpoint_keeps_base_path() {
    let client = CatalogClient::new(&config("http://example.test/prefix")).unwrap();
    assert_eq!(
      client.endpoint("api/fallas/3").unwrap().as_str(),
      "http://example.test/prefix/api/fallas/3"
    );

    let client = CatalogClient::new(&config("http://example.test")).unwrap();
    assert_eq!(
      client.endpoint(FALLAS_PATH).unwrap().as_str(),
      "http://example.test/api/fallas"
    );
  }

  #[test]
  fn test_invalid_url_is_rejected() {
    assert!(CatalogClient::new(&config("not a url")).is_err());
  }

  #[test]
  fn test_token_is_shared_between_clones() {
    let client = CatalogClient::new(&config("http://example.test")).unwrap();
    let clone = client.clone();
    client.set_token(Some("abc".to_string()));
    assert_eq!(clone.token().as_deref(), Some("abc"));
    client.set_token(None);
    assert_eq!(clone.token(), None);
  }

  #[test]
  fn test_rejected_keeps_body_text() {
    let err = rejected(StatusCode::SERVICE_UNAVAILABLE, b"maintenance");
    assert_eq!(
      err,
      FetchError::ServerRejected {
        status: StatusCode::SERVICE_UNAVAILABLE,
        message: Some("maintenance".to_string()),
      }
    );
  }

  #[tokio::test]
  async fn test_unreachable_server_is_classified() {
    // Port 9 on localhost (discard) is closed on test machines
    let client = CatalogClient::new(&ApiConfig {
      url: "http://127.0.0.1:9".to_string(),
      connect_timeout_secs: 2,
      read_timeout_secs: 2,
      ..ApiConfig::default()
    })
    .unwrap();

    match client.fetch_all(0, 10).await {
      Err(FetchError::Unreachable(_)) | Err(FetchError::Timeout) => {}
      other => panic!("unexpected {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_fetch_by_id_found() {
    let client = client_for("200 OK", FALLA_BODY).await;
    let falla = client.fetch_by_id(3).await.unwrap().unwrap();
    assert_eq!(falla.id, 3);
    assert_eq!(falla.name, "X");
    assert_eq!(falla.section, "1A");
  }

  #[tokio::test]
  async fn test_fetch_by_id_404_is_none() {
    let client = client_for("404 Not Found", "").await;
    assert_eq!(client.fetch_by_id(3).await, Ok(None));
  }

  #[tokio::test]
  async fn test_fetch_by_id_null_datos_is_none() {
    let client = client_for("200 OK", r#"{"exito":true,"mensaje":null,"datos":null}"#).await;
    assert_eq!(client.fetch_by_id(3).await, Ok(None));
  }

  #[tokio::test]
  async fn test_non_2xx_is_server_rejected() {
    let client = client_for("500 Internal Server Error", "boom").await;
    assert_eq!(
      client.fetch_all(0, 10).await,
      Err(FetchError::ServerRejected {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: Some("boom".to_string()),
      })
    );
  }

  #[tokio::test]
  async fn test_exito_false_carries_mensaje() {
    let client = client_for("200 OK", r#"{"exito":false,"mensaje":"nope","datos":null}"#).await;
    assert_eq!(
      client.fetch_by_id(3).await,
      Err(FetchError::ServerRejected {
        status: StatusCode::OK,
        message: Some("nope".to_string()),
      })
    );
  }

  #[tokio::test]
  async fn test_unparseable_body_is_malformed() {
    let client = client_for("200 OK", "<html>maintenance</html>").await;
    assert!(matches!(
      client.fetch_all(0, 10).await,
      Err(FetchError::Malformed(_))
    ));
  }

  #[tokio::test]
  async fn test_list_without_datos_is_malformed() {
    let client = client_for("200 OK", r#"{"exito":true,"datos":null}"#).await;
    assert!(matches!(
      client.fetch_all(0, 10).await,
      Err(FetchError::Malformed(_))
    ));
  }

  #[tokio::test]
  async fn test_slow_response_is_timeout() {
    let (url, _) = serve("200 OK", FALLA_BODY, Duration::from_secs(3)).await;
    let client = CatalogClient::new(&ApiConfig {
      url,
      connect_timeout_secs: 1,
      read_timeout_secs: 1,
      ..ApiConfig::default()
    })
    .unwrap();

    assert_eq!(client.fetch_by_id(3).await, Err(FetchError::Timeout));
  }

  #[tokio::test]
  async fn test_list_request_carries_paging_and_token() {
    let body = r#"{"exito":true,"datos":{"contenido":[{"idFalla":1,"nombre":"A"},{"idFalla":2,"nombre":"B"}],"paginaActual":0,"elementosPorPagina":2,"totalElementos":2,"totalPaginas":1,"esUltimaPagina":true}}"#;
    let (url, mut requests) = serve("200 OK", body, Duration::ZERO).await;
    let client = CatalogClient::new(&config(&url)).unwrap();
    client.set_token(Some("secret".to_string()));

    let fallas = client.fetch_all(2, 50).await.unwrap();
    assert_eq!(fallas.iter().map(|f| f.id).collect::<Vec<_>>(), vec![1, 2]);

    let head = requests.recv().await.unwrap();
    assert!(head.starts_with("GET /api/fallas?pagina=2&tamano=50 "), "{}", head);
    assert!(head.to_lowercase().contains("authorization: bearer secret"), "{}", head);
  }
}

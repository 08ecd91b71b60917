//! HTTP client for the notesync remote store.

use std::time::Duration;

use notesync_core::{Error, NewRemoteNote, RemoteStore, ServerId, ServerNote};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: ServerId,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    title: &'a str,
    tags: &'a [String],
}

/// Remote store reached over HTTP/JSON.
pub struct HttpRemote {
    client: Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(base_url: &str) -> Result<Self, Error> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Build a client whose requests fail with [`Error::Network`] after `timeout`.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, Error> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(Error::Validation("server URL cannot be empty".into()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn notes_url(&self) -> String {
        format!("{}/notes", self.base_url)
    }

    fn note_url(&self, id: &ServerId) -> String {
        format!("{}/notes/{}", self.base_url, id)
    }

    /// Returns true if the server answers its root URL with a success status.
    pub async fn ping(&self) -> bool {
        match self.client.get(format!("{}/", self.base_url)).send().await {
            Ok(response) => {
                let ok = response.status().is_success();
                if !ok {
                    tracing::debug!(status = %response.status(), "ping rejected");
                }
                ok
            }
            Err(e) => {
                tracing::debug!(error = %e, "ping failed");
                false
            }
        }
    }
}

fn network(e: reqwest::Error) -> Error {
    Error::Network(e.to_string())
}

/// Map a response status onto the error taxonomy. 404 on a single note is
/// `NotFound`; every other failure status is treated as a network failure.
fn check_status(response: Response, what: &str) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(Error::NotFound(what.to_string()));
    }
    Err(Error::Network(format!("{} failed with status {}", what, status)))
}

#[async_trait::async_trait(?Send)]
impl RemoteStore for HttpRemote {
    async fn create(&self, note: &NewRemoteNote) -> Result<ServerId, Error> {
        let response = self
            .client
            .post(self.notes_url())
            .json(note)
            .send()
            .await
            .map_err(network)?;

        // A 404 here means the collection itself is missing, not a note.
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Network(format!(
                "Create failed with status {}",
                status
            )));
        }

        let created: CreatedResponse = response
            .json()
            .await
            .map_err(|e| Error::Network(format!("Failed to parse create response: {}", e)))?;

        tracing::debug!(local_id = %note.local_id, server_id = %created.id, "created remotely");
        Ok(created.id)
    }

    async fn list(&self) -> Result<Vec<ServerNote>, Error> {
        let response = self
            .client
            .get(self.notes_url())
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Network(format!("List failed with status {}", status)));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Network(format!("Failed to parse note list: {}", e)))
    }

    async fn update(&self, id: &ServerId, title: &str, tags: &[String]) -> Result<(), Error> {
        let response = self
            .client
            .patch(self.note_url(id))
            .json(&UpdateRequest { title, tags })
            .send()
            .await
            .map_err(network)?;

        check_status(response, &format!("note {}", id))?;
        Ok(())
    }

    async fn delete(&self, id: &ServerId) -> Result<(), Error> {
        let response = self
            .client
            .delete(self.note_url(id))
            .send()
            .await
            .map_err(network)?;

        check_status(response, &format!("note {}", id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use notesync_core::{LocalId, Note};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    // Nothing listens on port 1; connections are refused immediately.
    const UNREACHABLE: &str = "http://127.0.0.1:1";

    fn remote() -> HttpRemote {
        HttpRemote::with_timeout(UNREACHABLE, Duration::from_secs(2)).unwrap()
    }

    type Requests = Arc<Mutex<Vec<String>>>;

    /// Start a server that answers each connection with the next canned
    /// `(status, body)` and records the raw requests it saw.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (HttpRemote, Requests) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Requests::default();
        let seen = requests.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_request(&mut socket).await;
                seen.lock().unwrap().push(request);
                let reply = format!(
                    "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\n\
                     content-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });

        let remote = HttpRemote::with_timeout(&url, Duration::from_secs(5)).unwrap();
        (remote, requests)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let body_len = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + body_len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn new_note() -> NewRemoteNote {
        NewRemoteNote::from(&Note::new("Hello", &["greeting".to_string()]).unwrap())
    }

    #[tokio::test]
    async fn test_create_returns_server_id() {
        let (remote, requests) = serve(vec![(201, r#"{"id":"srv-7"}"#)]).await;
        let note = new_note();

        let id = remote.create(&note).await.unwrap();
        assert_eq!(id, ServerId::new("srv-7"));

        let request = requests.lock().unwrap()[0].clone();
        assert!(request.starts_with("POST /notes "), "{}", request);
        assert!(request.contains(&note.local_id.to_string()));
        assert!(request.contains(r#""title":"Hello""#));
    }

    #[tokio::test]
    async fn test_create_404_is_network_error() {
        let (remote, _) = serve(vec![(404, "")]).await;
        let err = remote.create(&new_note()).await.unwrap_err();
        assert!(err.is_network(), "{:?}", err);
    }

    #[tokio::test]
    async fn test_create_with_malformed_body_is_network_error() {
        let (remote, _) = serve(vec![(201, "not json")]).await;
        assert!(remote.create(&new_note()).await.unwrap_err().is_network());
    }

    #[tokio::test]
    async fn test_list_parses_notes() {
        let (remote, requests) = serve(vec![(
            200,
            r#"[{"id":"srv-1","local_id":"aaaaaaaa-0000-4000-8000-000000000001","title":"One","tags":["a"],"created_at":"2024-01-02T03:04:05Z","updated_at":"2024-01-02T03:04:06Z"},
                {"id":"srv-2","title":"Two","created_at":"2024-01-01T00:00:00Z","updated_at":"2024-01-01T00:00:00Z"}]"#,
        )])
        .await;

        let notes = remote.list().await.unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].id, ServerId::new("srv-1"));
        assert_eq!(
            notes[0].local_id,
            Some("aaaaaaaa-0000-4000-8000-000000000001".parse().unwrap())
        );
        assert_eq!(notes[0].tags, vec!["a"]);
        assert_eq!(notes[1].local_id, None);
        assert!(notes[1].tags.is_empty());
        assert!(requests.lock().unwrap()[0].starts_with("GET /notes "));
    }

    #[tokio::test]
    async fn test_list_error_status_is_network_error() {
        let (remote, _) = serve(vec![(500, "")]).await;
        assert!(remote.list().await.unwrap_err().is_network());
    }

    #[tokio::test]
    async fn test_update_sends_title_and_tags() {
        let (remote, requests) = serve(vec![(200, "{}")]).await;
        let tags = vec!["x".to_string()];
        remote
            .update(&ServerId::new("srv-3"), "Renamed", &tags)
            .await
            .unwrap();

        let request = requests.lock().unwrap()[0].clone();
        assert!(request.starts_with("PATCH /notes/srv-3 "), "{}", request);
        assert!(request.contains(r#"{"title":"Renamed","tags":["x"]}"#));
    }

    #[tokio::test]
    async fn test_update_status_mapping() {
        let (remote, _) = serve(vec![(404, ""), (503, "")]).await;
        let id = ServerId::new("srv-3");
        assert!(remote.update(&id, "t", &[]).await.unwrap_err().is_not_found());
        assert!(remote.update(&id, "t", &[]).await.unwrap_err().is_network());
    }

    #[tokio::test]
    async fn test_delete_status_mapping() {
        let (remote, requests) = serve(vec![(204, ""), (404, ""), (500, "")]).await;
        let id = ServerId::new("srv-4");
        remote.delete(&id).await.unwrap();
        assert!(remote.delete(&id).await.unwrap_err().is_not_found());
        assert!(remote.delete(&id).await.unwrap_err().is_network());
        assert!(requests.lock().unwrap()[0].starts_with("DELETE /notes/srv-4 "));
    }

    #[tokio::test]
    async fn test_ping_follows_status() {
        let (remote, requests) = serve(vec![(200, ""), (503, "")]).await;
        assert!(remote.ping().await);
        assert!(!remote.ping().await);
        assert!(requests.lock().unwrap()[0].starts_with("GET / "));
    }

    #[test]
    fn test_urls_strip_trailing_slash() {
        let remote = HttpRemote::new("https://notes.example.com/api/ ").unwrap();
        assert_eq!(remote.base_url(), "https://notes.example.com/api");
        assert_eq!(remote.notes_url(), "https://notes.example.com/api/notes");
        assert_eq!(
            remote.note_url(&ServerId::new("abc")),
            "https://notes.example.com/api/notes/abc"
        );
    }

    #[test]
    fn test_empty_url_rejected() {
        assert!(matches!(
            HttpRemote::new("  "),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_update_request_shape() {
        let tags = vec!["a".to_string()];
        let body = serde_json::to_value(UpdateRequest {
            title: "T",
            tags: &tags,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"title": "T", "tags": ["a"]}));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let remote = remote();
        let note = Note::new("Hello", &[]).unwrap();

        let err = remote.create(&NewRemoteNote::from(&note)).await.unwrap_err();
        assert!(err.is_network(), "{:?}", err);

        assert!(remote.list().await.unwrap_err().is_network());

        let id = ServerId::new("srv-1");
        assert!(remote.update(&id, "t", &[]).await.unwrap_err().is_network());
        assert!(remote.delete(&id).await.unwrap_err().is_network());
    }

    #[tokio::test]
    async fn test_ping_unreachable() {
        assert!(!remote().ping().await);
    }

    #[test]
    fn test_server_note_parses_without_local_id() {
        let json = format!(
            r#"[{{"id":"srv-9","title":"Remote","tags":["x"],"created_at":"{0}","updated_at":"{0}"}}]"#,
            Utc::now().to_rfc3339()
        );
        let notes: Vec<ServerNote> = serde_json::from_str(&json).unwrap();
        assert_eq!(notes[0].id, ServerId::new("srv-9"));
        assert_eq!(notes[0].local_id, None::<LocalId>);
    }
}

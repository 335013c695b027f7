use std::convert::Infallible;
use std::net::SocketAddr;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

pub const BOUNDARY: &str = "frame";

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <title>Person Detection</title>
  </head>
  <body>
    <h1>Real-time Person Detection</h1>
    <img src="/video_feed" width="640" height="480">
  </body>
</html>
"#;

/// Latest annotated JPEG. `None` until the first frame is encoded.
pub type FrameReceiver = watch::Receiver<Option<Bytes>>;

/// One part of a `multipart/x-mixed-replace` stream.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n").as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

pub fn router(frames: FrameReceiver) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/video_feed", get(video_feed_handler))
        .with_state(frames)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_stream_server(frames: FrameReceiver, addr: SocketAddr) -> Result<(), std::io::Error> {
    tracing::info!("starting preview server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(frames)).await
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn video_feed_handler(State(frames): State<FrameReceiver>) -> Response {
    // Each viewer only sees the newest frame; frames published while it is
    // still writing the previous one are skipped.
    let parts = futures::stream::unfold(frames, |mut rx| async move {
        loop {
            rx.changed().await.ok()?;
            let frame = rx.borrow_and_update().clone();
            if let Some(jpeg) = frame {
                return Some((Ok::<_, Infallible>(multipart_part(&jpeg)), rx));
            }
        }
    });

    (
        [(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
        )],
        Body::from_stream(parts),
    )
        .into_response()
}

use crate::integration::support::{spawn_server, Harness};
use envtag::client::thumbs::thumbnail_url;
use envtag::client::ThumbnailFetcher;
use envtag::identity::path_hash;
use reqwest::StatusCode;
use std::time::Duration;

#[tokio::test]
async fn serves_rendered_thumbnails_by_slug() {
    let harness = Harness::new();
    let alpha = harness.open_with("alpha", &["a.jpg", "notes.txt"]);
    let env = harness.authority.registry().get(&alpha.id).unwrap();
    env.request_thumbnails(&["/a.jpg".to_string(), "/notes.txt".to_string()]);
    env.thumbnail_pipeline()
        .wait_idle(Duration::from_secs(5))
        .await
        .unwrap();

    let (addr, _stop) = spawn_server(harness.authority.clone()).await;
    let base = format!("http://{}", addr);
    let hash = path_hash("/a.jpg");

    let response = reqwest::get(thumbnail_url(&base, &alpha.slug, &hash))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "image/jpeg"
    );
    assert_eq!(response.text().await.unwrap(), "contents of a.jpg");

    let fetched = ThumbnailFetcher::new(base.clone())
        .fetch(&alpha.slug, &hash)
        .bytes()
        .await
        .unwrap();
    assert_eq!(fetched, b"contents of a.jpg");

    // Not renderable, so never written
    let err = ThumbnailFetcher::new(base)
        .fetch(&alpha.slug, &path_hash("/notes.txt"))
        .bytes()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), envtag::ErrorKind::NotFound);
}

#[tokio::test]
async fn rejects_bad_thumbnail_requests() {
    let harness = Harness::new();
    let alpha = harness.open_with("alpha", &["a.jpg"]);
    let (addr, _stop) = spawn_server(harness.authority.clone()).await;

    let status = move |path: String| async move {
        reqwest::get(format!("http://{}{}", addr, path))
            .await
            .unwrap()
            .status()
    };

    assert_eq!(
        status(format!("/static/env/{}/thumbs/", alpha.slug)).await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        status(format!("/static/env/{}/thumbs", alpha.slug)).await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        status("/static/env/nope/thumbs/0123456789abcdef.jpg".to_string()).await,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        status(format!("/static/env/{}/thumbs/0123456789abcdef.jpg", alpha.slug)).await,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        status(format!("/static/env/{}/thumbs/..%2F..%2Fsecret", alpha.slug)).await,
        StatusCode::NOT_FOUND
    );
}

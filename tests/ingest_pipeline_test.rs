//! End-to-end runs against a mocked channel preview and ImgBB.

use std::path::Path;
use std::time::Duration;

use channel_post_archiver::archive::ArchiveStore;
use channel_post_archiver::image::ImgbbHost;
use channel_post_archiver::ingest::{run_once, IngestOptions};
use channel_post_archiver::merge::MergePolicy;
use channel_post_archiver::post::{Archive, Post};
use channel_post_archiver::repair::RepairOptions;
use channel_post_archiver::source::{PostSource, TelegramWebSource};
use channel_post_archiver::window::DateWindow;
use chrono::NaiveDate;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("Invalid test date")
}

/// One message widget as rendered by the channel preview.
fn message(id: i64, datetime: &str, text: &str, photo: Option<&str>) -> String {
    let photo = photo
        .map(|url| {
            format!(
                r#"<a class="tgme_widget_message_photo_wrap" style="width:800px;background-image:url('{url}')"></a>"#
            )
        })
        .unwrap_or_default();
    format!(
        r#"<div class="tgme_widget_message_wrap">
  <div class="tgme_widget_message js-widget_message" data-post="testchannel/{id}">
    <div class="tgme_widget_message_bubble">
      {photo}
      <div class="tgme_widget_message_text js-message_text" dir="auto">{text}</div>
      <div class="tgme_widget_message_footer">
        <a class="tgme_widget_message_date"><time datetime="{datetime}" class="time">00:00</time></a>
      </div>
    </div>
  </div>
</div>"#
    )
}

fn page(messages: &[String]) -> String {
    format!(
        "<!DOCTYPE html><html><body><section class=\"tgme_channel_history\">{}</section></body></html>",
        messages.concat()
    )
}

/// Newest page: two posts on 2025-06-10 (UTC+8), one with a photo.
/// Older page: one more post that day and one from the day before.
async fn mount_channel(server: &MockServer) {
    let photo = format!("{}/photos/104.jpg", server.uri());

    Mock::given(method("GET"))
        .and(path("/s/testchannel"))
        .and(query_param_is_missing("before"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page(&[
            message(103, "2025-06-10T02:00:00+00:00", "第三則 third", None),
            message(104, "2025-06-10T03:00:00+00:00", "with photo", Some(&photo)),
        ])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/s/testchannel"))
        .and(query_param("before", "103"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page(&[
            message(101, "2025-06-09T03:00:00+00:00", "yesterday", None),
            message(102, "2025-06-09T17:00:00+00:00", "just after midnight", None),
        ])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/photos/104.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFF, 0xD8, 0xFF, 0xE0]))
        .mount(server)
        .await;
}

async fn mount_imgbb(server: &MockServer, expected_uploads: u64) {
    Mock::given(method("POST"))
        .and(path("/1/upload"))
        .and(query_param("key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "data": {"url": "https://i.ibb.co/abc/photo.jpg"}
        })))
        .expect(expected_uploads)
        .mount(server)
        .await;
}

fn source_for(server: &MockServer, max_pages: usize) -> TelegramWebSource {
    TelegramWebSource::new(reqwest::Client::new(), &server.uri(), "testchannel", max_pages)
        .expect("Failed to create source")
}

fn imgbb_for(server: &MockServer) -> ImgbbHost {
    ImgbbHost::new(
        reqwest::Client::new(),
        format!("{}/1/upload", server.uri()),
        "test-key",
    )
}

fn options(policy: MergePolicy, repair: bool) -> IngestOptions {
    IngestOptions {
        window: DateWindow::new(date("2025-06-10"), date("2025-06-10")),
        policy,
        post_delay: Duration::ZERO,
        repair: repair.then(|| RepairOptions {
            delay: Duration::ZERO,
            limit: 10,
        }),
    }
}

fn read_archive(path: &Path) -> Archive {
    let bytes = std::fs::read(path).expect("Failed to read archive");
    serde_json::from_slice(&bytes).expect("Archive is not valid JSON")
}

#[tokio::test]
async fn test_first_run_builds_archive() {
    let server = MockServer::start().await;
    mount_channel(&server).await;
    mount_imgbb(&server, 1).await;

    let dir = TempDir::new().unwrap();
    let store = ArchiveStore::new(dir.path().join("posts.json"));
    let source = source_for(&server, 5);
    let host = imgbb_for(&server);

    let summary = run_once(
        &store,
        &source,
        Some(&host),
        &options(MergePolicy::PureAppend, true),
    )
    .await
    .unwrap();

    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.added, 3);
    assert_eq!(summary.images_uploaded, 1);
    assert_eq!(summary.total, 3);

    let archive = read_archive(store.path());
    let posts: Vec<&Post> = archive.posts().collect();
    assert_eq!(
        posts.iter().map(|p| p.id).collect::<Vec<_>>(),
        vec![Some(104), Some(103), Some(102)]
    );
    assert!(posts.iter().all(|p| p.date == date("2025-06-10")));
    assert_eq!(posts[0].image.as_deref(), Some("https://i.ibb.co/abc/photo.jpg"));
    assert_eq!(posts[1].text, "第三則 third");
    assert_eq!(posts[1].image, None);

    let written = std::fs::read_to_string(store.path()).unwrap();
    assert!(written.contains("第三則"));
}

#[tokio::test]
async fn test_second_run_reuses_images() {
    let server = MockServer::start().await;
    mount_channel(&server).await;
    // One upload across both runs
    mount_imgbb(&server, 1).await;

    let dir = TempDir::new().unwrap();
    let store = ArchiveStore::new(dir.path().join("posts.json"));
    let source = source_for(&server, 5);
    let host = imgbb_for(&server);
    let options = options(MergePolicy::PureAppend, true);

    run_once(&store, &source, Some(&host), &options).await.unwrap();
    let first = std::fs::read(store.path()).unwrap();

    let summary = run_once(&store, &source, Some(&host), &options)
        .await
        .unwrap();
    assert_eq!(summary.added, 0);
    assert_eq!(summary.unchanged, 3);
    assert_eq!(summary.images_reused, 1);
    assert_eq!(summary.images_uploaded, 0);
    assert_eq!(std::fs::read(store.path()).unwrap(), first);
}

#[tokio::test]
async fn test_repair_pass_fills_missing_images() {
    let server = MockServer::start().await;
    mount_channel(&server).await;
    mount_imgbb(&server, 2).await;

    let photo = format!("{}/photos/90.jpg", server.uri());
    Mock::given(method("GET"))
        .and(path("/testchannel/90"))
        .and(query_param("embed", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page(&[message(
            90,
            "2025-06-01T03:00:00+00:00",
            "needs repair",
            Some(&photo),
        )])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/photos/90.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFF, 0xD8]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/testchannel/91"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("posts.json");
    std::fs::write(
        &path,
        r#"[
  {"id": 91, "date": "2025-06-01", "text": "deleted upstream", "image": null},
  {"id": 90, "date": "2025-06-01", "text": "needs repair", "image": null},
  {"id": 80, "date": "2025-05-20", "text": "already hosted", "image": "http://x/80"}
]"#,
    )
    .unwrap();

    let store = ArchiveStore::new(&path);
    let source = source_for(&server, 5);
    let host = imgbb_for(&server);

    let summary = run_once(
        &store,
        &source,
        Some(&host),
        &options(MergePolicy::PureAppend, true),
    )
    .await
    .unwrap();
    assert_eq!(summary.repaired, 1);
    assert_eq!(summary.total, 6);

    let archive = read_archive(&path);
    let by_id = |id| archive.posts().find(|p| p.id == Some(id)).unwrap();
    assert_eq!(by_id(90).image.as_deref(), Some("https://i.ibb.co/abc/photo.jpg"));
    assert_eq!(by_id(91).image, None);
    assert_eq!(by_id(80).image.as_deref(), Some("http://x/80"));
}

#[tokio::test]
async fn test_fetch_by_id_misses_when_embed_lacks_message() {
    let server = MockServer::start().await;
    // The embed answers for a deleted post with a neighbouring message
    Mock::given(method("GET"))
        .and(path("/testchannel/92"))
        .and(query_param("embed", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page(&[message(
            93,
            "2025-06-01T03:00:00+00:00",
            "neighbour",
            None,
        )])))
        .expect(1)
        .mount(&server)
        .await;

    let source = source_for(&server, 5);
    assert_eq!(source.fetch_by_id(92).await.unwrap(), None);
}

#[tokio::test]
async fn test_repair_marks_posts_missing_from_embed_as_retracted() {
    let server = MockServer::start().await;
    mount_channel(&server).await;
    mount_imgbb(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/testchannel/92"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page(&[])))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("posts.json");
    std::fs::write(
        &path,
        r#"[{"id": 92, "date": "2025-06-01", "text": "gone", "image": null}]"#,
    )
    .unwrap();

    let store = ArchiveStore::new(&path);
    let source = source_for(&server, 5);
    let host = imgbb_for(&server);
    let options = options(MergePolicy::PureAppend, true);

    run_once(&store, &source, Some(&host), &options).await.unwrap();
    // Marked on the first run, so the second does not look it up again
    run_once(&store, &source, Some(&host), &options).await.unwrap();

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains(r#""image_status": "retracted""#));
}

#[tokio::test]
async fn test_window_policy_drops_retracted_posts() {
    let server = MockServer::start().await;
    mount_channel(&server).await;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("posts.json");
    std::fs::write(
        &path,
        r#"[
  {"id": 100, "date": "2025-06-10", "text": "retracted today", "image": null},
  {"id": 50, "date": "2025-06-05", "text": "history", "image": null}
]"#,
    )
    .unwrap();

    let store = ArchiveStore::new(&path);
    let source = source_for(&server, 5);
    let options = options(MergePolicy::window([date("2025-06-10")]), false);

    let summary = run_once(&store, &source, None, &options).await.unwrap();
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.added, 3);

    let archive = read_archive(&path);
    assert!(archive.posts().all(|p| p.id != Some(100)));
    assert!(archive.posts().any(|p| p.id == Some(50)));
    assert_eq!(archive.len(), 4);
}

#[tokio::test]
async fn test_source_failure_leaves_archive_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/s/testchannel"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("posts.json");
    let original = r#"[{"id": 1, "date": "2025-06-10", "text": "keep me", "image": null}]"#;
    std::fs::write(&path, original).unwrap();

    let store = ArchiveStore::new(&path);
    let source = source_for(&server, 5);
    let options = options(MergePolicy::window([date("2025-06-10")]), false);

    assert!(run_once(&store, &source, None, &options).await.is_err());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
}

#[tokio::test]
async fn test_page_limit_aborts_without_write() {
    let server = MockServer::start().await;
    mount_channel(&server).await;

    let dir = TempDir::new().unwrap();
    let store = ArchiveStore::new(dir.path().join("posts.json"));
    // The window start is only reached on the second page
    let source = source_for(&server, 1);

    let err = run_once(
        &store,
        &source,
        None,
        &options(MergePolicy::PureAppend, false),
    )
    .await
    .unwrap_err();
    assert!(format!("{err:#}").contains("MAX_PAGES"));
    assert!(!store.path().exists());
}

#[tokio::test]
async fn test_misconfigured_image_host_aborts_without_write() {
    let server = MockServer::start().await;
    mount_channel(&server).await;
    Mock::given(method("POST"))
        .and(path("/1/upload"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = ArchiveStore::new(dir.path().join("posts.json"));
    let source = source_for(&server, 5);
    let host = imgbb_for(&server);

    let result = run_once(
        &store,
        &source,
        Some(&host),
        &options(MergePolicy::PureAppend, false),
    )
    .await;
    assert!(result.is_err());
    assert!(!store.path().exists());
}

use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dealwatch::app::AppContext;
use dealwatch::config::Config;

const LISTING: &str = r#"<ol id="threads">
  <li class="threadbit hot" id="thread_100"><a href="threads/100">A</a></li>
  <li class="threadbit" id="thread_101-new"><a href="threads/101">B</a></li>
  <li class="threadbit" id="thread_99"><a href="threads/99">old</a></li>
</ol>"#;

const PHOTO_THREAD: &str = r#"<html><head><title>Monitor 27&quot; &amp; cabo</title></head><body>
<div class="postcontent restore">
  <a href="https://shop.example/monitor">comprar</a>
  <img src="https://shop.example/monitor.jpg" />
</div></body></html>"#;

const TEXT_THREAD: &str = r#"<html><head><title>Cupom geral</title>
<meta name="description" content="Cupom: SAVE10" />
</head><body><div class="content">sem links</div></body></html>"#;

fn config(dir: &TempDir, forum: &MockServer, telegram: &MockServer) -> Config {
    let mut config = Config::default();
    config.crawler.base_url = format!("{}/", forum.uri());
    config.crawler.state_file = dir.path().join("state.json");
    config.telegram.token = "TOKEN".into();
    config.telegram.chat = -1001;
    config.telegram.api_url = telegram.uri();
    config.telegram.queue_dir = dir.path().join("queue");
    config.telegram.retry_interval = Duration::from_millis(20);
    config
}

async fn mount_forum(forum: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/forums/407"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
        .mount(forum)
        .await;
    Mock::given(method("GET"))
        .and(path("/threads/100"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PHOTO_THREAD))
        .mount(forum)
        .await;
    Mock::given(method("GET"))
        .and(path("/threads/101"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TEXT_THREAD))
        .mount(forum)
        .await;
}

fn ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}}))
}

async fn bot_calls(telegram: &MockServer) -> Vec<(String, Value)> {
    telegram
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|r| (r.url.path().to_string(), r.body_json::<Value>().unwrap_or(Value::Null)))
        .collect()
}

#[tokio::test]
async fn test_backfill_delivers_listed_threads() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("state.json"), r#"{"nextthread":100}"#).unwrap();

    let forum = MockServer::start().await;
    let telegram = MockServer::start().await;
    mount_forum(&forum).await;
    Mock::given(method("POST"))
        .respond_with(ok())
        .mount(&telegram)
        .await;

    let ctx = AppContext::new(config(&dir, &forum, &telegram)).unwrap();
    let queue = ctx.open_queue().unwrap();
    let mut scheduler = ctx.scheduler(queue.clone());
    scheduler.tick().await;

    let calls = bot_calls(&telegram).await;
    assert_eq!(calls.len(), 2);

    let (photo_path, photo) = &calls[0];
    assert_eq!(photo_path, "/botTOKEN/sendPhoto");
    assert_eq!(photo["chat_id"], -1001);
    assert_eq!(photo["photo"], "https://shop.example/monitor.jpg");
    assert_eq!(photo["parse_mode"], "HTML");
    let caption = photo["caption"].as_str().unwrap();
    assert!(caption.contains(">Monitor 27\" &amp; cabo</a>"));
    assert!(caption.contains("<a href=\"https://shop.example/monitor\">LINK</a>"));

    let (text_path, text) = &calls[1];
    assert_eq!(text_path, "/botTOKEN/sendMessage");
    assert_eq!(text["disable_web_page_preview"], true);
    let body = text["text"].as_str().unwrap();
    assert!(body.contains("/threads/101\">Cupom geral</a>"));
    assert!(body.ends_with("\n\nCupom: SAVE10"));

    assert_eq!(scheduler.cursor(), 102);
    let saved = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
    assert_eq!(saved, r#"{"nextthread":102}"#);
    assert!(queue.pending_files().unwrap().is_empty());

    queue.shutdown().await;
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_failed_delivery_is_queued_and_retried() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("state.json"), r#"{"nextthread":101}"#).unwrap();

    let forum = MockServer::start().await;
    let telegram = MockServer::start().await;
    mount_forum(&forum).await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(502).set_body_json(json!({"ok": false, "description": "Bad Gateway"})),
        )
        .up_to_n_times(2)
        .mount(&telegram)
        .await;
    Mock::given(method("POST"))
        .respond_with(ok())
        .mount(&telegram)
        .await;

    let ctx = AppContext::new(config(&dir, &forum, &telegram)).unwrap();
    let queue = ctx.open_queue().unwrap();
    let mut scheduler = ctx.scheduler(queue.clone());
    scheduler.tick().await;

    assert_eq!(scheduler.cursor(), 102);

    let mut drained = false;
    for _ in 0..250 {
        if queue.pending_files().unwrap().is_empty() && bot_calls(&telegram).await.len() == 3 {
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(drained, "queued message was not delivered");

    let calls = bot_calls(&telegram).await;
    assert!(calls.iter().all(|(p, _)| p == "/botTOKEN/sendMessage"));
    assert_eq!(calls[2].1["text"], calls[0].1["text"]);

    queue.shutdown().await;
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_restart_reloads_undelivered_messages() {
    let dir = TempDir::new().unwrap();
    let forum = MockServer::start().await;
    let telegram = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ok())
        .mount(&telegram)
        .await;

    let queue_dir = dir.path().join("queue");
    std::fs::create_dir_all(&queue_dir).unwrap();
    std::fs::write(
        queue_dir.join("leftover.json"),
        r#"{"kind":"text","chat_id":-1001,"text":"left over","parse_mode":"Html","disable_web_page_preview":true}"#,
    )
    .unwrap();

    let ctx = AppContext::new(config(&dir, &forum, &telegram)).unwrap();
    let queue = ctx.open_queue().unwrap();

    for _ in 0..250 {
        if queue.pending_files().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(queue.pending_files().unwrap().is_empty());

    let calls = bot_calls(&telegram).await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1["text"], "left over");
    assert_eq!(calls[0].1["parse_mode"], "HTML");

    queue.shutdown().await;
    ctx.shutdown().await;
}

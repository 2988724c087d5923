use std::time::Duration;

use httpmock::prelude::*;
use outage_bot::config::RetryPolicy;
use outage_bot::config::ScraperConfig;
use outage_bot::entity::Address;
use outage_bot::scrape::ScheduleSource;
use outage_bot::scrape::error::ScrapeError;
use outage_bot::scrape::static_scraper::StaticScraper;

mod common;

const SCHEDULE_PAGE: &str = r#"
<html><body>
  <header class="card">Меню</header>
  <div class="schedule-block">
    <h3>Соборна, 10</h3>
    <p>Відключення 08:00-10:00 та 14:00-16:00</p>
  </div>
</body></html>
"#;

fn address() -> Address {
    Address::new("Кременчук", "Соборна", "10")
}

fn scraper_for(server: &MockServer) -> StaticScraper {
    let config = ScraperConfig {
        url: server.url("/shutdowns"),
        ..common::fast_scraper_config()
    };
    StaticScraper::new(config).unwrap()
}

fn scraper_with_retry_delay(server: &MockServer, delay: Duration) -> StaticScraper {
    let config = ScraperConfig {
        url: server.url("/shutdowns"),
        retry: RetryPolicy { attempts: 2, delay },
        ..common::fast_scraper_config()
    };
    StaticScraper::new(config).unwrap()
}

#[tokio::test]
async fn test_fetch_sends_address_and_extracts_container() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/shutdowns")
                .query_param_exists("city")
                .query_param_exists("street")
                .query_param("house", "10");
            then.status(200)
                .header("content-type", "text/html; charset=utf-8")
                .body(SCHEDULE_PAGE);
        })
        .await;

    let fragment = scraper_for(&server).fetch(&address()).await.unwrap();

    mock.assert_async().await;
    assert!(!fragment.is_no_schedule());
    assert!(fragment.html.contains("08:00-10:00"));
    assert!(!fragment.html.contains("Меню"));
}

#[tokio::test]
async fn test_page_without_schedule_reports_no_schedule() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/shutdowns");
            then.status(200)
                .body("<html><body><p>Адресу не знайдено</p></body></html>");
        })
        .await;

    let fragment = scraper_for(&server).fetch(&address()).await.unwrap();
    assert!(fragment.is_no_schedule());
}

#[tokio::test]
async fn test_persistent_server_error_fails_after_all_attempts() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/shutdowns");
            then.status(503);
        })
        .await;

    let result = scraper_for(&server).fetch(&address()).await;
    match result {
        Err(e @ ScrapeError::Http(_)) => assert!(e.is_transient()),
        other => panic!("expected Http error, got {other:?}"),
    }
    mock.assert_hits_async(2).await;
}

#[tokio::test]
async fn test_server_error_is_retried_once() {
    let server = MockServer::start_async().await;
    let mut failing = server
        .mock_async(|when, then| {
            when.method(GET).path("/shutdowns");
            then.status(503);
        })
        .await;
    let scraper = scraper_with_retry_delay(&server, Duration::from_millis(300));

    // Swap the 503 for the real page while the scraper waits to retry.
    let recover = async {
        while failing.hits_async().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        failing.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/shutdowns");
                then.status(200).body(SCHEDULE_PAGE);
            })
            .await
    };
    let addr = address();
    let (result, healthy) = tokio::join!(scraper.fetch(&addr), recover);

    let fragment = result.unwrap();
    assert!(fragment.html.contains("14:00-16:00"));
    healthy.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_stalled_response_is_bounded_by_navigation_timeout() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/shutdowns");
            then.status(200)
                .delay(Duration::from_secs(2))
                .body(SCHEDULE_PAGE);
        })
        .await;

    let started = std::time::Instant::now();
    let result = scraper_for(&server).fetch(&address()).await;

    assert!(matches!(result, Err(ScrapeError::NavigationTimeout { .. })));
    assert!(started.elapsed() < Duration::from_secs(2));
    mock.assert_hits_async(2).await;
}

#[tokio::test]
async fn test_error_page_is_retried_not_recorded_as_no_schedule() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/shutdowns");
            then.status(200)
                .header("content-type", "text/html; charset=utf-8")
                .body("<html><body><p>Сталася помилка. Спробуйте пізніше</p></body></html>");
        })
        .await;

    let result = scraper_for(&server).fetch(&address()).await;

    assert!(matches!(result, Err(ScrapeError::SiteError { .. })));
    mock.assert_hits_async(2).await;
}

#[tokio::test]
async fn test_static_source_name() {
    let server = MockServer::start_async().await;
    assert_eq!(scraper_for(&server).name(), "static-html");
}

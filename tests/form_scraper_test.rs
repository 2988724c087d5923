use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use outage_bot::entity::Address;
use outage_bot::scrape::ScheduleSource;
use outage_bot::scrape::error::ScrapeError;
use outage_bot::scrape::form_scraper::FormScraper;

mod common;

use common::FakeDom;
use common::FakePageSource;

const TABLE: &str = "<table><tr><td>08:00-10:00</td></tr></table>";

fn address() -> Address {
    Address::new("Кременчук", "Соборна", "10")
}

fn scraper(dom: FakeDom, concurrency: usize) -> (FormScraper, Arc<FakePageSource>) {
    let pages = Arc::new(FakePageSource::new(dom, concurrency));
    let scraper = FormScraper::new(pages.clone(), common::fast_scraper_config());
    (scraper, pages)
}

#[tokio::test]
async fn test_fills_form_picking_suggestions() {
    let mut dom = FakeDom::standard_form().with_result(&format!("\n  {TABLE}  \n"));
    dom.suggestions = HashMap::from([
        (
            "input#city.form__input".to_string(),
            vec!["м. Світловодськ".to_string(), "м. Кременчук".to_string()],
        ),
        (
            "input#street.form__input".to_string(),
            vec!["вул. Соборна".to_string()],
        ),
    ]);
    let (scraper, pages) = scraper(dom, 1);

    let fragment = scraper.fetch(&address()).await.unwrap();
    assert!(!fragment.is_no_schedule());
    assert_eq!(fragment.html, TABLE);

    assert_eq!(
        pages.log(),
        vec![
            "goto https://outages.test/shutdowns",
            "clear input#city.form__input",
            "type input#city.form__input Кременчук",
            "pick м. Кременчук",
            "clear input#street.form__input",
            "type input#street.form__input Соборна",
            "pick вул. Соборна",
            "clear input#house_num.form__input",
            "type input#house_num.form__input 10",
            "enter input#house_num.form__input",
            "click button[type='submit']",
            "close",
        ]
    );
    assert_eq!(pages.acquired(), 1);
    assert_eq!(pages.active(), 0);
}

#[tokio::test]
async fn test_falls_back_to_alternative_selectors_and_enter_submit() {
    let dom = FakeDom {
        visible: vec![
            "input[name='city']".to_string(),
            "input#street".to_string(),
            "input[name='house_num']".to_string(),
        ],
        ..Default::default()
    }
    .with_result(TABLE);
    let (scraper, pages) = scraper(dom, 1);

    let fragment = scraper.fetch(&address()).await.unwrap();
    assert_eq!(fragment.html, TABLE);

    let log = pages.log();
    assert!(log.contains(&"type input[name='city'] Кременчук".to_string()));
    assert!(log.contains(&"type input#street Соборна".to_string()));
    let enters = log
        .iter()
        .filter(|entry| *entry == "enter input[name='house_num']")
        .count();
    // Once for the missing suggestion list, once to submit.
    assert_eq!(enters, 2);
    assert!(!log.iter().any(|entry| entry.starts_with("click")));
}

#[tokio::test]
async fn test_site_message_means_no_schedule() {
    let dom = FakeDom {
        body_text: "Графік для цієї адреси НЕ ЗНАЙДЕНО".to_string(),
        ..FakeDom::standard_form()
    };
    let (scraper, pages) = scraper(dom, 1);

    let fragment = scraper.fetch(&address()).await.unwrap();
    assert!(fragment.is_no_schedule());
    assert_eq!(pages.acquired(), 1);
}

#[tokio::test]
async fn test_site_error_text_is_retried_not_no_schedule() {
    let dom = FakeDom {
        body_text: "Сталася помилка. Спробуйте пізніше".to_string(),
        ..FakeDom::standard_form()
    };
    let (scraper, pages) = scraper(dom, 1);

    let result = scraper.fetch(&address()).await;
    assert!(matches!(result, Err(ScrapeError::SiteError { .. })));
    assert_eq!(pages.acquired(), 2);
    assert_eq!(pages.active(), 0);
}

#[tokio::test]
async fn test_missing_field_is_not_retried() {
    let (scraper, pages) = scraper(FakeDom::default(), 1);

    let result = scraper.fetch(&address()).await;
    match result {
        Err(ScrapeError::FieldNotFound { field, tried }) => {
            assert_eq!(field, "city");
            assert_eq!(tried.len(), 3);
        }
        other => panic!("expected FieldNotFound, got {other:?}"),
    }
    assert_eq!(pages.acquired(), 1);
    assert_eq!(pages.active(), 0);
}

#[tokio::test]
async fn test_result_timeout_is_retried_on_a_fresh_page() {
    let (scraper, pages) = scraper(FakeDom::standard_form(), 1);

    let result = scraper.fetch(&address()).await;
    assert!(matches!(result, Err(ScrapeError::ResultTimeout { .. })));
    assert_eq!(pages.acquired(), 2);
    assert_eq!(pages.active(), 0);
    assert_eq!(
        pages.log().iter().filter(|entry| *entry == "close").count(),
        2
    );
}

#[tokio::test]
async fn test_too_short_result_is_retried() {
    let (scraper, pages) = scraper(FakeDom::standard_form().with_result("<td></td>"), 1);

    let result = scraper.fetch(&address()).await;
    assert!(matches!(result, Err(ScrapeError::EmptyResult { len: 9 })));
    assert_eq!(pages.acquired(), 2);
}

#[tokio::test]
async fn test_slow_navigation_times_out() {
    let dom = FakeDom {
        load_delay: Duration::from_secs(5),
        ..FakeDom::standard_form().with_result(TABLE)
    };
    let (scraper, pages) = scraper(dom, 1);

    let result = scraper.fetch(&address()).await;
    assert!(matches!(result, Err(ScrapeError::NavigationTimeout { .. })));
    assert_eq!(pages.acquired(), 2);
    assert_eq!(pages.active(), 0);
}

#[tokio::test]
async fn test_gate_serializes_concurrent_fetches() {
    let dom = FakeDom {
        load_delay: Duration::from_millis(20),
        ..FakeDom::standard_form().with_result(TABLE)
    };
    let (scraper, pages) = scraper(dom, 1);
    let first = address();
    let other = Address::new("Кременчук", "Миру", "2");

    let (a, b) = tokio::join!(scraper.fetch(&first), scraper.fetch(&other));
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(pages.acquired(), 2);
    assert_eq!(pages.max_active(), 1);
}

#[tokio::test]
async fn test_gate_capacity_allows_parallel_pages() {
    let dom = FakeDom {
        load_delay: Duration::from_millis(20),
        ..FakeDom::standard_form().with_result(TABLE)
    };
    let (scraper, pages) = scraper(dom, 2);
    let first = address();
    let other = Address::new("Кременчук", "Миру", "2");

    let (a, b) = tokio::join!(scraper.fetch(&first), scraper.fetch(&other));
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(pages.max_active(), 2);
}

#[tokio::test]
async fn test_closed_gate_reports_pool_closed() {
    let (scraper, pages) = scraper(FakeDom::standard_form().with_result(TABLE), 1);
    pages.gate().close();

    let result = scraper.fetch(&address()).await;
    assert!(matches!(result, Err(ScrapeError::PoolClosed)));
    assert_eq!(pages.acquired(), 0);
}

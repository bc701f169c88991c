use std::sync::Arc;
use std::time::Duration;

use trawler_client::{ReqwestTransport, SiteManifest};
use trawler_core::alert::AlertManager;
use trawler_core::config::{CrawlConfig, RequestConfig};
use trawler_core::registry::SpiderRegistry;
use trawler_core::request::RequestEngine;
use trawler_core::spider::SpiderContext;
use trawler_core::status::SpiderStatusKind;
use trawler_core::store::MemoryStore;
use trawler_core::supervisor::SpiderManager;
use trawler_core::traits::ItemStore;

use crate::integration::common::{Reply, TestServer};

fn listing(items: &[(&str, &str)]) -> String {
    let body: String = items
        .iter()
        .map(|(href, title)| {
            format!(r#"<div class="item"><a href="{href}"><img src="{href}thumb.jpg"></a><span class="caption">{title}</span></div>"#)
        })
        .collect();
    format!(r#"<nav class="pagination"><a>1</a><a>2</a></nav>{body}"#)
}

fn detail(title: &str) -> String {
    format!(r#"<h1>{title}</h1><div class="thumbs"><img src="1.jpg"><img src="2.jpg"></div>"#)
}

fn manifest(base_url: &str) -> SiteManifest {
    SiteManifest::from_json(&format!(
        r#"{{
            "sites": [{{
                "name": "local",
                "base_url": "{base_url}/",
                "layout": {{ "page_template": "/page/{{page}}/", "first_page": 1 }},
                "selectors": {{
                    "pagination": ".pagination a",
                    "listing_item": ".item",
                    "listing_title": ".caption",
                    "listing_link": "a",
                    "listing_poster": "img",
                    "title": "h1",
                    "gallery": ".thumbs img"
                }}
            }}]
        }}"#
    ))
    .unwrap()
}

#[tokio::test]
async fn manifest_site_crawls_into_store() {
    let server = TestServer::start().await;
    server.route("/", vec![Reply::ok(listing(&[]))]);
    server.route("/page/1/", vec![Reply::ok(listing(&[("/g/1/", "One"), ("/g/2/", "Two")]))]);
    server.route("/page/2/", vec![Reply::ok(listing(&[("/g/2/", "Two"), ("/g/3/", "Three")]))]);
    server.route("/g/1/", vec![Reply::ok(detail("One"))]);
    server.route("/g/2/", vec![Reply::ok(detail("Two"))]);
    server.route("/g/3/", vec![Reply::ok(detail("Three"))]);

    let mut registry = SpiderRegistry::new();
    manifest(&server.base_url).register_into(&mut registry).unwrap();

    let store = Arc::new(MemoryStore::new());
    let request = RequestConfig::default()
        .with_max_retries(1)
        .with_retry_delay(Duration::ZERO, false)
        .with_timeout(Duration::from_secs(2));
    let engine = Arc::new(RequestEngine::new(
        Arc::new(ReqwestTransport::new().unwrap()),
        request.clone(),
    ));
    let context = SpiderContext::new(engine)
        .with_store(Arc::clone(&store) as Arc<dyn ItemStore>)
        .with_batch_size(1);
    let config = CrawlConfig {
        request,
        ..CrawlConfig::default()
    };

    let manager =
        SpiderManager::from_registry(&registry, &context, &config, Arc::new(AlertManager::new()))
            .unwrap();
    let report = manager.start_full_parsing().await.unwrap();

    assert!(!report.skipped);
    assert_eq!(report.new_items, 3);
    assert_eq!(report.statuses.len(), 1);
    assert_eq!(report.statuses[0].status, SpiderStatusKind::Success);

    let items = store.items();
    let titles: Vec<_> = items.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(titles.len(), 3);
    assert!(titles.contains(&"One") && titles.contains(&"Two") && titles.contains(&"Three"));

    let one = items.iter().find(|i| i.title == "One").unwrap();
    assert_eq!(one.url, server.url("/g/1/"));
    assert_eq!(one.gallery, vec![server.url("/g/1/1.jpg"), server.url("/g/1/2.jpg")]);
    assert_eq!(manager.starter().spiders()[0].status(), "100%");
}

use std::time::Duration;

use serde_json::{Value, json};
use wiremock::matchers::{body_string_contains, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::fetch::{BackoffConfig, FetchConfig};

fn fetcher() -> Arc<ContentFetcher> {
    let config = FetchConfig {
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            randomisation: 0.0,
            ..Default::default()
        },
        ..Default::default()
    };
    Arc::new(ContentFetcher::new(config).unwrap())
}

fn client(server: &MockServer, get_categories: bool, options: WikiOptions) -> WikiClient {
    let metadata = WikiMetadata::new(&server.uri(), "w/api.php", "Main Page")
        .unwrap()
        .with_categories(get_categories);
    WikiClient::new(fetcher(), metadata, options)
}

fn run_for(client: &WikiClient) -> RunContext {
    let meta = client.metadata();
    RunContext::new(
        BackendCapabilities::default(),
        Endpoints { mobile: meta.mobile_url(), legacy: meta.legacy_url(), mobile_local: false, legacy_local: false },
    )
}

fn json_response(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

struct Echo;

#[async_trait::async_trait]
impl ArticleRenderer for Echo {
    type Context = ();
    type Output = (String, bool, Value);

    async fn render(
        &self, raw: Value, article_id: &str, _context: &(), used_fallback: bool,
    ) -> Result<Vec<Self::Output>, Error> {
        Ok(vec![(article_id.to_string(), used_fallback, raw)])
    }
}

#[tokio::test]
async fn test_continued_categories_merge_into_full_list() {
    let server = MockServer::start().await;
    Mock::given(path("/w/api.php"))
        .and(query_param("titles", "A|B"))
        .and(query_param("cllimit", "max"))
        .and(query_param_is_missing("clcontinue"))
        .respond_with(json_response(json!({
            "continue": {"clcontinue": "2|Gamma", "continue": "||revisions|redirects|coordinates"},
            "query": {"pages": [
                {"pageid": 1, "ns": 0, "title": "A",
                 "revisions": [{"revid": 11, "timestamp": "2024-01-01T00:00:00Z"}],
                 "categories": [{"ns": 14, "title": "Category:Alpha"}]},
                {"pageid": 2, "ns": 0, "title": "B",
                 "revisions": [{"revid": 22}],
                 "categories": [{"ns": 14, "title": "Category:Beta"}]}
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/w/api.php"))
        .and(query_param("titles", "A|B"))
        .and(query_param("clcontinue", "2|Gamma"))
        .respond_with(json_response(json!({
            "batchcomplete": true,
            "query": {"pages": [
                {"pageid": 1, "ns": 0, "title": "A"},
                {"pageid": 2, "ns": 0, "title": "B",
                 "categories": [{"ns": 14, "title": "Category:Gamma"}, {"ns": 14, "title": "Category:Delta"}]}
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let wiki = client(&server, true, WikiOptions::default());
    let run = run_for(&wiki);
    let details = wiki.get_article_details_ids(&run, &["A", "B"], false).await.unwrap();

    assert_eq!(
        details["B"].categories.as_deref().unwrap(),
        ["Category:Beta", "Category:Gamma", "Category:Delta"]
    );
    assert_eq!(details["B"].revision.as_ref().map(|r| r.id), Some(22));
    assert_eq!(details["A"].categories.as_deref().unwrap(), ["Category:Alpha"]);
    assert_eq!(details["A"].revision.as_ref().map(|r| r.id), Some(11));
}

#[tokio::test]
async fn test_database_error_aborts_query() {
    let server = MockServer::start().await;
    Mock::given(path("/w/api.php"))
        .respond_with(json_response(json!({
            "error": {"code": "internal_api_error_DBQueryError", "info": "Database query error"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let wiki = client(&server, false, WikiOptions::default());
    let run = run_for(&wiki);
    let result = wiki.get_article_details_ids(&run, &["A"], false).await;
    assert!(matches!(result, Err(Error::ApiDatabase(_))));
}

#[tokio::test]
async fn test_empty_title_list_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(path("/w/api.php"))
        .respond_with(json_response(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let wiki = client(&server, false, WikiOptions::default());
    let run = run_for(&wiki);
    let titles: [&str; 0] = [];
    assert!(wiki.get_article_details_ids(&run, &titles, false).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_subcategories_collected_for_category_pages() {
    let server = MockServer::start().await;
    Mock::given(path("/w/api.php"))
        .and(query_param("titles", "Category:Foo"))
        .respond_with(json_response(json!({
            "query": {"pages": [{"pageid": 9, "ns": 14, "title": "Category:Foo"}]}
        })))
        .mount(&server)
        .await;
    Mock::given(path("/w/api.php"))
        .and(query_param("list", "categorymembers"))
        .and(query_param("cmtitle", "Category:Foo"))
        .and(query_param_is_missing("cmcontinue"))
        .respond_with(json_response(json!({
            "continue": {"cmcontinue": "subcat|ABC|12", "continue": "-||"},
            "query": {"categorymembers": [
                {"pageid": 10, "ns": 14, "title": "Category:Sub1"},
                {"pageid": 11, "ns": 14}
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/w/api.php"))
        .and(query_param("list", "categorymembers"))
        .and(query_param("cmcontinue", "subcat|ABC|12"))
        .respond_with(json_response(json!({
            "query": {"categorymembers": [{"pageid": 12, "ns": 14, "title": "Category:Sub2"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let wiki = client(&server, true, WikiOptions::default());
    let run = run_for(&wiki);
    let details = wiki
        .get_article_details_ids(&run, &["Category:Foo"], false)
        .await
        .unwrap();

    let subcats: Vec<_> = details["Category:Foo"]
        .subcategories
        .as_ref()
        .unwrap()
        .iter()
        .map(|p| p.title.as_str())
        .collect();
    assert_eq!(subcats, ["Category:Sub1", "Category:Sub2"]);
}

#[tokio::test]
async fn test_namespace_walk_returns_page_marker() {
    let server = MockServer::start().await;
    Mock::given(path("/w/api.php"))
        .and(query_param("generator", "allpages"))
        .and(query_param("gapnamespace", "0"))
        .and(query_param("rawcontinue", "true"))
        .and(query_param_is_missing("gapcontinue"))
        .and(query_param_is_missing("cocontinue"))
        .respond_with(json_response(json!({
            "query-continue": {
                "allpages": {"gapcontinue": "Next"},
                "coordinates": {"cocontinue": "10|1"}
            },
            "query": {"pages": [
                {"pageid": 1, "ns": 0, "title": "X", "coordinates": [{"lat": 1.5, "lon": 2.0}]},
                {"pageid": 2, "ns": 0, "title": "Y"}
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/w/api.php"))
        .and(query_param("cocontinue", "10|1"))
        .respond_with(json_response(json!({
            "query-continue": {"allpages": {"gapcontinue": "Next"}},
            "query": {"pages": [
                {"pageid": 1, "ns": 0, "title": "X"},
                {"pageid": 2, "ns": 0, "title": "Y", "coordinates": [{"lat": -3.0, "lon": 4.25}]}
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/w/api.php"))
        .and(query_param("gapcontinue", "Next"))
        .respond_with(json_response(json!({
            "query": {"pages": [{"pageid": 3, "ns": 0, "title": "Z"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let wiki = client(&server, false, WikiOptions::default());
    let run = run_for(&wiki);

    let first = wiki.get_article_details_ns(&run, 0, None).await.unwrap();
    assert_eq!(first.gapcontinue.as_deref(), Some("Next"));
    assert_eq!(first.details["X"].coordinates.as_deref(), Some("1.5;2"));
    assert_eq!(first.details["Y"].coordinates.as_deref(), Some("-3;4.25"));

    let second = wiki
        .get_article_details_ns(&run, 0, first.gapcontinue.as_deref())
        .await
        .unwrap();
    assert!(second.gapcontinue.is_none());
    assert!(second.details.contains_key("Z"));
}

#[tokio::test]
async fn test_capability_probe_switches_to_local_legacy() {
    let server = MockServer::start().await;
    Mock::given(path("/api/rest_v1/page/mobile-sections/Main_Page"))
        .respond_with(json_response(json!({"lead": {"id": 1}, "remaining": {}})))
        .mount(&server)
        .await;
    Mock::given(path("/w/api.php"))
        .and(query_param("action", "visualeditor"))
        .respond_with(json_response(json!({"visualeditor": {"result": "error"}})))
        .mount(&server)
        .await;
    Mock::given(path("/w/api.php"))
        .and(query_param("action", "query"))
        .respond_with(json_response(json!({
            "warnings": {"main": {"warnings": "Unrecognized value for parameter \"prop\": coordinates."}},
            "query": {"pages": [{"ns": 0, "title": "Main Page"}]}
        })))
        .mount(&server)
        .await;

    let options = WikiOptions { local_legacy_url: Some("http://127.0.0.1:1/pagebundle/".into()), ..Default::default() };
    let wiki = client(&server, false, options);
    let run = wiki.check_capabilities().await;

    assert!(run.capabilities.mobile_available);
    assert!(!run.capabilities.legacy_available);
    assert!(!run.capabilities.coordinates_available);
    assert_eq!(run.endpoints.legacy, "http://127.0.0.1:1/pagebundle/");
    assert!(run.endpoints.legacy_local);
    assert!(!run.endpoints.mobile_local);
    assert!(!run.fallback_latched());
}

#[tokio::test]
async fn test_probe_failure_without_local_fallback() {
    let server = MockServer::start().await;
    Mock::given(path("/api/rest_v1/page/mobile-sections/Main_Page"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(path("/w/api.php"))
        .and(query_param("action", "query"))
        .respond_with(json_response(json!({"query": {"pages": []}})))
        .mount(&server)
        .await;

    let options = WikiOptions { local_fallback: false, probe_legacy: false, ..Default::default() };
    let wiki = client(&server, false, options);
    let run = wiki.check_capabilities().await;

    assert!(!run.capabilities.mobile_available);
    assert!(run.capabilities.legacy_available);
    assert!(run.capabilities.coordinates_available);
    assert!(!run.mobile_usable());
    assert_eq!(run.endpoints.mobile, wiki.metadata().mobile_url());
}

#[tokio::test]
async fn test_render_backend_error_latches_fallback() {
    let server = MockServer::start().await;
    Mock::given(path("/api/rest_v1/page/mobile-sections/A"))
        .respond_with(json_response(json!({"type": "api_error", "detail": "Page or revision not found."})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/api/rest_v1/page/mobile-sections/B"))
        .respond_with(json_response(json!({"lead": {}})))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(path("/w/api.php"))
        .and(query_param("action", "visualeditor"))
        .respond_with(json_response(json!({"visualeditor": {"content": "<p>ok</p>"}})))
        .expect(2)
        .mount(&server)
        .await;

    let wiki = client(&server, false, WikiOptions::default());
    let run = run_for(&wiki);

    let first = wiki.get_article(&run, "A", &Echo, &(), false).await.unwrap();
    assert_eq!(first[0].0, "A");
    assert!(first[0].1);
    assert!(run.fallback_latched());

    let second = wiki.get_article(&run, "B", &Echo, &(), false).await.unwrap();
    assert!(second[0].1);
}

#[tokio::test]
async fn test_transport_failure_retries_once_on_fallback() {
    let server = MockServer::start().await;
    Mock::given(path("/api/rest_v1/page/mobile-sections/C"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(path("/w/api.php"))
        .and(query_param("action", "visualeditor"))
        .and(query_param("page", "C"))
        .respond_with(json_response(json!({"visualeditor": {"content": "<p>C</p>"}})))
        .expect(1)
        .mount(&server)
        .await;

    let wiki = client(&server, false, WikiOptions::default());
    let run = run_for(&wiki);

    let out = wiki.get_article(&run, "C", &Echo, &(), false).await.unwrap();
    assert!(out[0].1);
    assert_eq!(out[0].2["visualeditor"]["content"], "<p>C</p>");
    assert!(!run.fallback_latched());
}

#[tokio::test]
async fn test_not_found_article_is_not_retried_on_fallback() {
    let server = MockServer::start().await;
    Mock::given(path("/api/rest_v1/page/mobile-sections/Gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/w/api.php"))
        .and(query_param("action", "visualeditor"))
        .respond_with(json_response(json!({"visualeditor": {"content": ""}})))
        .expect(0)
        .mount(&server)
        .await;

    let wiki = client(&server, false, WikiOptions::default());
    let run = run_for(&wiki);

    let err = wiki.get_article(&run, "Gone", &Echo, &(), false).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_main_page_always_uses_fallback() {
    let server = MockServer::start().await;
    Mock::given(path("/api/rest_v1/page/mobile-sections/Main_Page"))
        .respond_with(json_response(json!({"lead": {}})))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(path("/w/api.php"))
        .and(query_param("action", "visualeditor"))
        .and(query_param("page", "Main_Page"))
        .respond_with(json_response(json!({"visualeditor": {"content": "<p>home</p>"}})))
        .expect(1)
        .mount(&server)
        .await;

    let wiki = client(&server, false, WikiOptions::default());
    let run = run_for(&wiki);

    let out = wiki.get_article(&run, "Main_Page", &Echo, &(), false).await.unwrap();
    assert!(out[0].1);
}

#[tokio::test]
async fn test_login_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .and(query_param("meta", "tokens"))
        .respond_with(json_response(json!({"query": {"tokens": {"logintoken": "tok123"}}})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/w/api.php"))
        .and(body_string_contains("lgtoken=tok123"))
        .and(body_string_contains("lgname=bot"))
        .respond_with(json_response(json!({"login": {"result": "Success", "lguserid": 1}})))
        .expect(1)
        .mount(&server)
        .await;

    let wiki = client(&server, false, WikiOptions::default());
    wiki.login("bot", "secret").await.unwrap();
}

#[tokio::test]
async fn test_login_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("meta", "tokens"))
        .respond_with(json_response(json!({"query": {"tokens": {"logintoken": "tok123"}}})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(json_response(json!({"login": {"result": "Failed", "reason": "Incorrect password"}})))
        .mount(&server)
        .await;

    let wiki = client(&server, false, WikiOptions::default());
    let err = wiki.login("bot", "wrong").await.unwrap_err();
    assert!(matches!(err, Error::LoginFailed(ref reason) if reason.contains("Incorrect password")));
}

#[test]
fn test_backend_error_shapes() {
    assert!(backend_error(&json!({"type": "api_error", "detail": "x"})).is_some());
    assert!(backend_error(&json!({"error": {"code": "missingtitle", "info": "gone"}})).is_some());
    assert!(backend_error(&json!({"error": "plain string"})).is_none());
    assert!(backend_error(&json!({"lead": {}})).is_none());
}

//! Common test utilities for repo-harvest integration tests

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use repo_harvest::Config;

/// Login every fixture repository belongs to
pub const LOGIN: &str = "octocat";

/// Archive body served for `name`
pub fn archive_body(name: &str) -> Vec<u8> {
    format!("PK archive of {LOGIN}/{name}").into_bytes()
}

fn repo_json(name: &str) -> serde_json::Value {
    json!({
        "url": format!("https://api.github.com/repos/{LOGIN}/{name}"),
        "html_url": format!("https://github.com/{LOGIN}/{name}"),
        "name": name,
        "full_name": format!("{LOGIN}/{name}"),
    })
}

/// Serve `names` as the repository listing, `per_page` per page
pub async fn mount_listing(server: &MockServer, names: &[&str], per_page: usize) {
    let pages: Vec<&[&str]> = names.chunks(per_page).collect();
    for (index, page) in pages.iter().enumerate() {
        let body: Vec<_> = page.iter().map(|n| repo_json(n)).collect();
        Mock::given(method("GET"))
            .and(path(format!("/users/{LOGIN}/repos")))
            .and(query_param("page", (index + 1).to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }
    // Page past the end is empty
    Mock::given(method("GET"))
        .and(path(format!("/users/{LOGIN}/repos")))
        .and(query_param("page", (pages.len() + 1).to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

/// Serve the zipball of `name`
pub async fn mount_archive(server: &MockServer, name: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/{LOGIN}/{name}/zipball")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive_body(name)))
        .mount(server)
        .await;
}

/// Answer requests for `name`'s zipball with `status`
pub async fn mount_archive_status(server: &MockServer, name: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/{LOGIN}/{name}/zipball")))
        .respond_with(
            ResponseTemplate::new(status).set_body_json(json!({ "message": "Not Found" })),
        )
        .mount(server)
        .await;
}

/// Accept the delete of `name`, expecting it exactly `times` times
pub async fn mount_delete(server: &MockServer, name: &str, times: u64) {
    Mock::given(method("DELETE"))
        .and(path(format!("/repos/{LOGIN}/{name}")))
        .respond_with(ResponseTemplate::new(204))
        .expect(times)
        .mount(server)
        .await;
}

/// Config pointing at `server`, downloading into a fresh temp dir
pub fn config_for(server: &MockServer, per_page: u32) -> (Config, TempDir) {
    let dir = TempDir::new().unwrap();
    let json = json!({
        "parallelism": 3,
        "channel_capacity": 2,
        "download_dir": dir.path().join("archives"),
        "github": {
            "login": LOGIN,
            "token": "ghp_integration",
            "api_base_url": server.uri(),
            "per_page": per_page
        }
    });
    let config = Config::from_json_str(&json.to_string()).unwrap();
    (config, dir)
}

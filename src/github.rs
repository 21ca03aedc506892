//! GitHub last-commit lookup for the /about command.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

pub struct GithubClient {
    client: reqwest::Client,
    repo: String,
    token: SecretString,
}

impl GithubClient {
    /// `repo` is "owner/name".
    pub fn new(repo: String, token: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            repo,
            token,
        }
    }

    /// Committer timestamp of the newest commit on the default branch.
    pub async fn latest_commit(&self) -> anyhow::Result<DateTime<Utc>> {
        let url = format!("https://api.github.com/repos/{}/commits", self.repo);
        let response = self
            .client
            .get(&url)
            .header(
                "Authorization",
                format!("token {}", self.token.expose_secret()),
            )
            .header("User-Agent", concat!("mailgram/", env!("CARGO_PKG_VERSION")))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("GitHub commits request failed: HTTP {}", response.status());
        }

        let commits: serde_json::Value = response.json().await?;
        let date = commits
            .get(0)
            .and_then(|commit| commit.pointer("/commit/committer/date"))
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("no commit date in GitHub reply"))?;

        Ok(date.parse()?)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_date_extraction_path() {
        let commits: serde_json::Value = serde_json::json!([
            {"sha": "abc", "commit": {"committer": {"date": "2024-05-01T09:30:00Z"}}},
            {"sha": "def", "commit": {"committer": {"date": "2024-04-01T09:30:00Z"}}}
        ]);
        let date = commits
            .get(0)
            .and_then(|commit| commit.pointer("/commit/committer/date"))
            .and_then(serde_json::Value::as_str)
            .unwrap();
        let parsed: DateTime<Utc> = date.parse().unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-05-01T09:30:00+00:00");
    }

    #[tokio::test]
    async fn lookup_with_bad_token_fails() {
        let github = GithubClient::new(
            "example/nonexistent".to_string(),
            SecretString::from("bad-token".to_string()),
        );
        let result = github.latest_commit().await;
        assert!(result.is_err());
    }
}

use rand::distributions::Alphanumeric;
use rand::Rng;

// DNS labels for test servers are capped at 64 characters including the base
// domain, so the repo-name segment of an ID gets trimmed to fit. The numeric
// and random suffixes are always kept intact so IDs stay distinguishable.
const DNS_NAME_BUDGET: usize = 64;
const RANDOM_SUFFIX_LEN: usize = 5;

/// Identifying information for one SpinWick environment, derived entirely
/// from the pull request it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spinwick {
    pub repo_name: String,
    pub pr_number: u64,
    pub repeatable_id: String,
    pub unique_id: String,
}

impl Spinwick {
    pub fn new(repo_name: &str, pr_number: u64, base_domain: &str) -> Self {
        Self {
            repo_name: repo_name.to_owned(),
            pr_number,
            repeatable_id: repeatable_id(repo_name, pr_number),
            unique_id: unique_id(repo_name, pr_number, base_domain),
        }
    }

    pub fn dns(&self, base_domain: &str) -> String {
        format!("{}.{}", self.unique_id, base_domain)
    }

    pub fn url(&self, base_domain: &str) -> String {
        format!("https://{}", self.dns(base_domain))
    }
}

/// Deterministic `<repo>-pr-<number>` identifier used for installation
/// lookups. Computable from the repo name and PR number alone, with no I/O,
/// so existence checks stay a pure function of the pull request.
pub fn repeatable_id(repo_name: &str, pr_number: u64) -> String {
    format!("{repo_name}-pr-{pr_number}").to_lowercase()
}

/// Repeatable ID plus a random 5-character suffix, trimmed to fit the DNS
/// budget. Only the repo-name segment is shortened (from its end); the
/// `-pr-<number>-<suffix>` tail survives intact, and the repo segment clamps
/// to empty when the base domain alone exhausts the budget.
pub fn unique_id(repo_name: &str, pr_number: u64, base_domain: &str) -> String {
    let tail = format!("-pr-{pr_number}-{}", random_suffix());
    let full = format!("{repo_name}{tail}").to_lowercase();

    let over = (full.len() + base_domain.len()).saturating_sub(DNS_NAME_BUDGET);
    if over == 0 {
        return full;
    }

    let mut keep = repo_name.len().saturating_sub(over);
    while keep > 0 && !repo_name.is_char_boundary(keep) {
        keep -= 1;
    }
    format!("{}{tail}", &repo_name[..keep]).to_lowercase()
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_SUFFIX_LEN)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeatable_id_is_deterministic_and_lowercased() {
        assert_eq!(repeatable_id("Test-Repo", 456), "test-repo-pr-456");
        assert_eq!(repeatable_id("Test-Repo", 456), repeatable_id("test-repo", 456));
    }

    #[test]
    fn repeatable_ids_differ_by_pr_number() {
        assert_ne!(repeatable_id("repo", 1), repeatable_id("repo", 2));
    }

    #[test]
    fn new_populates_both_ids() {
        let spinwick = Spinwick::new("test-repo", 123, "example.com");

        assert_eq!(spinwick.repeatable_id, "test-repo-pr-123");
        // 5 char random suffix + 17 chars for the rest
        assert_eq!(spinwick.unique_id.len(), 22);
        assert!(spinwick.unique_id.starts_with("test-repo-pr-123-"));
    }

    #[test]
    fn unique_id_keeps_suffixes_with_short_domain() {
        let id = unique_id("mattermost", 789, "example.com");
        assert_eq!(id.len(), 23);
        assert!(id.starts_with("mattermost-pr-789-"));
    }

    #[test]
    fn unique_id_trims_repo_name_for_long_domains() {
        let id = unique_id("mattermost", 29790, "test.cloud.mattermost.com");
        assert!(id.len() + "test.cloud.mattermost.com".len() <= 64);
        assert!(id.starts_with("mattermost-pr-29790-"));
    }

    #[test]
    fn unique_id_satisfies_budget_for_very_long_repo_names() {
        let repo = "a".repeat(58);
        let domain = "preview.example-cloud.net"; // 25 characters
        let id = unique_id(&repo, 8888, domain);

        assert!(id.len() + domain.len() <= 64);
        assert!(id.contains("-pr-8888-"));
    }

    #[test]
    fn unique_id_clamps_repo_segment_to_empty() {
        let domain = "d".repeat(70);
        let id = unique_id("repo", 7, &domain);
        assert!(id.starts_with("-pr-7-"));
    }

    #[test]
    fn dns_and_url_compose_unique_id_and_domain() {
        let mut spinwick = Spinwick::new("repo", 1, "example.com");
        spinwick.unique_id = "test-unique-id".to_owned();

        assert_eq!(spinwick.dns("example.com"), "test-unique-id.example.com");
        assert_eq!(spinwick.url("example.com"), "https://test-unique-id.example.com");
    }
}

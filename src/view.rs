//! Pure derivations over an owner's application list: ordering, filtering,
//! search and the dashboard counters.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::Application;
use crate::status::{ApplicationStatus, StatusGroup, UnknownStatus};

/// Newest application first; ties broken by creation time, newest first.
pub fn sort_newest_first(applications: &mut [Application]) {
    applications.sort_by(compare_newest_first);
}

fn compare_newest_first(a: &Application, b: &Application) -> Ordering {
    b.applied_date
        .cmp(&a.applied_date)
        .then_with(|| b.created_at.cmp(&a.created_at))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    All,
    Only(ApplicationStatus),
}

impl StatusFilter {
    pub fn matches(self, status: ApplicationStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(wanted) => wanted == status,
        }
    }
}

impl FromStr for StatusFilter {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            Ok(StatusFilter::All)
        } else {
            trimmed.parse().map(StatusFilter::Only)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationFilter {
    pub status: StatusFilter,
    pub search: String,
}

impl ApplicationFilter {
    pub fn new(status: StatusFilter, search: impl Into<String>) -> Self {
        Self {
            status,
            search: search.into(),
        }
    }

    pub fn matches(&self, application: &Application) -> bool {
        if !self.status.matches(application.status) {
            return false;
        }
        let needle = self.search.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        application.company.to_lowercase().contains(&needle)
            || application.role.to_lowercase().contains(&needle)
    }

    /// Matching applications, keeping the input order.
    pub fn apply<'a>(&self, applications: &'a [Application]) -> Vec<&'a Application> {
        applications
            .iter()
            .filter(|application| self.matches(application))
            .collect()
    }
}

/// Counters for the whole collection, independent of any filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationStats {
    pub total: usize,
    pub applied: usize,
    pub interview: usize,
    pub offer: usize,
    pub rejected: usize,
    pub inactive: usize,
    pub by_status: BTreeMap<ApplicationStatus, usize>,
}

impl Default for ApplicationStats {
    fn default() -> Self {
        Self {
            total: 0,
            applied: 0,
            interview: 0,
            offer: 0,
            rejected: 0,
            inactive: 0,
            by_status: ApplicationStatus::ALL
                .iter()
                .map(|status| (*status, 0))
                .collect(),
        }
    }
}

impl ApplicationStats {
    pub fn from_applications(applications: &[Application]) -> Self {
        let mut stats = Self::default();
        for application in applications {
            stats.total += 1;
            *stats.by_status.entry(application.status).or_insert(0) += 1;
            let group = match application.status.group() {
                StatusGroup::Applied => &mut stats.applied,
                StatusGroup::Interview => &mut stats.interview,
                StatusGroup::Offer => &mut stats.offer,
                StatusGroup::Rejected => &mut stats.rejected,
                StatusGroup::Inactive => &mut stats.inactive,
            };
            *group += 1;
        }
        stats
    }

    pub fn count(&self, status: ApplicationStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use uuid::Uuid;

    fn application(company: &str, role: &str, status: ApplicationStatus, date: &str) -> Application {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        Application {
            id: Uuid::new_v4(),
            owner_id: Uuid::nil(),
            company: company.into(),
            role: role.into(),
            status,
            applied_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            note: None,
            created_at: created,
            updated_at: created,
        }
    }

    fn sample() -> Vec<Application> {
        vec![
            application("Acme", "Engineer", ApplicationStatus::Applied, "2024-01-15"),
            application("Globex", "Data Engineer", ApplicationStatus::Offer, "2024-02-01"),
            application("Initech", "Designer", ApplicationStatus::Applied, "2023-12-20"),
            application("Hooli", "Product Manager", ApplicationStatus::TechInterview, "2024-01-30"),
            application("acme labs", "Researcher", ApplicationStatus::Rejected, "2024-01-02"),
        ]
    }

    #[test]
    fn sorts_by_date_descending() {
        let mut apps = sample();
        sort_newest_first(&mut apps);
        let companies: Vec<_> = apps.iter().map(|a| a.company.as_str()).collect();
        assert_eq!(
            companies,
            vec!["Globex", "Hooli", "Acme", "acme labs", "Initech"]
        );
    }

    #[test]
    fn same_day_ties_prefer_latest_created() {
        let mut older = application("Old", "Dev", ApplicationStatus::Applied, "2024-03-01");
        let mut newer = application("New", "Dev", ApplicationStatus::Applied, "2024-03-01");
        older.created_at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        newer.created_at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut apps = vec![older, newer];
        sort_newest_first(&mut apps);
        assert_eq!(apps[0].company, "New");
    }

    #[test]
    fn status_filter_selects_exact_status() {
        let apps = sample();
        let filter = ApplicationFilter::new(StatusFilter::Only(ApplicationStatus::Applied), "");
        let matched = filter.apply(&apps);
        assert_eq!(matched.len(), 2);
        assert!(matched
            .iter()
            .all(|a| a.status == ApplicationStatus::Applied));
    }

    #[test]
    fn search_is_case_insensitive_over_company_and_role() {
        let apps = sample();
        let by_company = ApplicationFilter::new(StatusFilter::All, "ACME").apply(&apps);
        assert_eq!(by_company.len(), 2);

        let by_role = ApplicationFilter::new(StatusFilter::All, "engineer").apply(&apps);
        let companies: Vec<_> = by_role.iter().map(|a| a.company.as_str()).collect();
        assert_eq!(companies, vec!["Acme", "Globex"]);
    }

    #[test]
    fn combined_filter_is_the_intersection() {
        let apps = sample();
        let status_only =
            ApplicationFilter::new(StatusFilter::Only(ApplicationStatus::Applied), "");
        let search_only = ApplicationFilter::new(StatusFilter::All, "acme");
        let both = ApplicationFilter::new(StatusFilter::Only(ApplicationStatus::Applied), "acme");

        let expected: Vec<_> = status_only
            .apply(&apps)
            .into_iter()
            .filter(|a| search_only.matches(a))
            .map(|a| a.id)
            .collect();
        let actual: Vec<_> = both.apply(&apps).into_iter().map(|a| a.id).collect();
        assert_eq!(actual, expected);
        assert_eq!(actual.len(), 1);
    }

    #[test]
    fn blank_search_matches_everything() {
        let apps = sample();
        assert_eq!(ApplicationFilter::new(StatusFilter::All, "   ").apply(&apps).len(), 5);
    }

    #[test]
    fn stats_ignore_the_active_filter() {
        let apps = sample();
        let stats = ApplicationStats::from_applications(&apps);
        assert_eq!(stats.total, 5);
        assert_eq!(stats.applied, 2);
        assert_eq!(stats.interview, 1);
        assert_eq!(stats.offer, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.count(ApplicationStatus::TechInterview), 1);
        assert_eq!(stats.count(ApplicationStatus::Withdrawn), 0);

        for filter in [
            ApplicationFilter::new(StatusFilter::Only(ApplicationStatus::Offer), ""),
            ApplicationFilter::new(StatusFilter::All, "hooli"),
        ] {
            let _visible = filter.apply(&apps);
            assert_eq!(ApplicationStats::from_applications(&apps), stats);
        }
    }

    #[test]
    fn empty_collection_has_zero_counts() {
        let stats = ApplicationStats::from_applications(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.by_status.len(), ApplicationStatus::ALL.len());
        assert!(stats.by_status.values().all(|count| *count == 0));
    }

    #[test]
    fn parses_status_filter() {
        assert_eq!("all".parse::<StatusFilter>(), Ok(StatusFilter::All));
        assert_eq!("".parse::<StatusFilter>(), Ok(StatusFilter::All));
        assert_eq!(
            "Offer".parse::<StatusFilter>(),
            Ok(StatusFilter::Only(ApplicationStatus::Offer))
        );
        assert!("nope".parse::<StatusFilter>().is_err());
    }
}

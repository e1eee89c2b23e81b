use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{error, info};

use crate::client::{BookContent, BookStackApi, PagePayload, PageTag};
use crate::config::{Container, UpsertTarget};
use crate::error::{Result, SyncError};
use crate::parser::Page;

/// Remote page name -> page id for one book or chapter.
pub type Inventory = BTreeMap<String, u64>;

/// What to do when updating an existing page fails. Creating a page that
/// fails always ends the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateFailurePolicy {
    #[default]
    Continue,
    Abort,
}

#[derive(Debug, Clone, Default)]
pub struct UpsertOptions {
    pub update_failure_policy: UpdateFailurePolicy,
    pub dry_run: bool,
    /// Sent with every page when non-empty.
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageAction {
    Created,
    Updated,
    UpdateFailed,
    WouldCreate,
    WouldUpdate,
}

impl PageAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::UpdateFailed => "update_failed",
            Self::WouldCreate => "would_create",
            Self::WouldUpdate => "would_update",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageOutcome {
    pub name: String,
    pub action: PageAction,
    pub page_id: Option<u64>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpsertReport {
    pub inventory_size: usize,
    pub created: usize,
    pub updated: usize,
    pub update_failures: usize,
    pub pages: Vec<PageOutcome>,
}

/// List the pages already in the target container.
pub fn fetch_inventory<A: BookStackApi>(api: &mut A, target: &UpsertTarget) -> Result<Inventory> {
    info!("Retrieving existing pages from BookStack");

    let Some(container) = target.container() else {
        return Err(SyncError::configuration(
            "cannot pull existing pages as both book-id and chapter-id are missing",
        ));
    };

    let fetched = match container {
        Container::Chapter(chapter_id) => api.get_chapter(chapter_id).map(|chapter| {
            chapter
                .pages
                .into_iter()
                .map(|page| (page.name, page.id))
                .collect::<Vec<_>>()
        }),
        Container::Book(book_id) => api.get_book(book_id).map(|book| {
            book.contents
                .into_iter()
                .filter(BookContent::is_page)
                .map(|entry| (entry.name, entry.id))
                .collect::<Vec<_>>()
        }),
    };
    let entries = fetched.map_err(|source| {
        error!("Failed to retrieve pages from {container}: {source}");
        SyncError::RemoteFetch {
            container: container.to_string(),
            source,
        }
    })?;

    let mut inventory = Inventory::new();
    for (name, id) in entries {
        info!("Retrieved page: {name} - {id}");
        // Duplicate names: the later entry wins.
        inventory.insert(name, id);
    }
    info!("Retrieved {} existing pages from BookStack", inventory.len());

    Ok(inventory)
}

pub fn build_payload(target: &UpsertTarget, page: &Page, tags: &[String]) -> PagePayload {
    PagePayload {
        name: page.name.clone(),
        markdown: page.content.clone(),
        book_id: target.book_id,
        chapter_id: target.chapter_id,
        tags: tags
            .iter()
            .map(|tag| PageTag {
                name: tag.clone(),
                value: String::new(),
            })
            .collect(),
    }
}

/// Create or update each page by name, in order, one request at a time.
///
/// The inventory is fetched once up front; if that fails nothing is written.
/// Pages written before a fatal error stay written.
pub fn upsert_pages<A: BookStackApi>(
    api: &mut A,
    target: &UpsertTarget,
    pages: &[Page],
    options: &UpsertOptions,
) -> Result<UpsertReport> {
    let inventory = fetch_inventory(api, target)?;
    let mut report = UpsertReport {
        inventory_size: inventory.len(),
        ..UpsertReport::default()
    };

    info!("Upserting pages in BookStack");
    for page in pages {
        let existing = inventory.get(&page.name).copied();

        if options.dry_run {
            let action = if existing.is_some() {
                PageAction::WouldUpdate
            } else {
                PageAction::WouldCreate
            };
            info!("Dry run: page \"{}\" {}", page.name, action.as_str());
            report.pages.push(PageOutcome {
                name: page.name.clone(),
                action,
                page_id: existing,
                detail: None,
            });
            continue;
        }

        let payload = build_payload(target, page, &options.tags);
        match existing {
            Some(page_id) => match api.update_page(page_id, &payload) {
                Ok(_) => {
                    info!("Updated page: {}", page.name);
                    report.updated += 1;
                    report.pages.push(PageOutcome {
                        name: page.name.clone(),
                        action: PageAction::Updated,
                        page_id: Some(page_id),
                        detail: None,
                    });
                }
                Err(source) => {
                    error!("Failed to update page: {} - {source}", page.name);
                    if options.update_failure_policy == UpdateFailurePolicy::Abort {
                        return Err(SyncError::PageUpdate {
                            name: page.name.clone(),
                            id: page_id,
                            source,
                        });
                    }
                    report.update_failures += 1;
                    report.pages.push(PageOutcome {
                        name: page.name.clone(),
                        action: PageAction::UpdateFailed,
                        page_id: Some(page_id),
                        detail: Some(source.to_string()),
                    });
                }
            },
            None => {
                let created = api.create_page(&payload).map_err(|source| {
                    error!("Failed to create page: {} - {source}", page.name);
                    SyncError::PageCreate {
                        name: page.name.clone(),
                        source,
                    }
                })?;
                info!("Created page: {}", page.name);
                report.created += 1;
                report.pages.push(PageOutcome {
                    name: page.name.clone(),
                    action: PageAction::Created,
                    page_id: Some(created.id),
                    detail: None,
                });
            }
        }
    }
    info!("Finished upserting pages to BookStack");

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::path::PathBuf;

    use reqwest::StatusCode;

    use super::*;
    use crate::client::{
        ApiError, BookContent, BookDetail, ChapterDetail, PageRecord, PageSummary,
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        GetChapter(u64),
        GetBook(u64),
        Create(PagePayload),
        Update(u64, PagePayload),
    }

    #[derive(Default)]
    struct MockApi {
        chapters: BTreeMap<u64, ChapterDetail>,
        books: BTreeMap<u64, BookDetail>,
        failing_updates: BTreeSet<u64>,
        failing_creates: BTreeSet<String>,
        calls: Vec<Call>,
        next_id: u64,
    }

    fn api_error(path: &str) -> ApiError {
        ApiError::Status {
            url: format!("https://wiki.example.org/api/{path}"),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".to_string(),
        }
    }

    impl BookStackApi for MockApi {
        fn get_chapter(&mut self, chapter_id: u64) -> std::result::Result<ChapterDetail, ApiError> {
            self.calls.push(Call::GetChapter(chapter_id));
            self.chapters
                .get(&chapter_id)
                .cloned()
                .ok_or_else(|| api_error(&format!("chapters/{chapter_id}")))
        }

        fn get_book(&mut self, book_id: u64) -> std::result::Result<BookDetail, ApiError> {
            self.calls.push(Call::GetBook(book_id));
            self.books
                .get(&book_id)
                .cloned()
                .ok_or_else(|| api_error(&format!("books/{book_id}")))
        }

        fn create_page(
            &mut self,
            payload: &PagePayload,
        ) -> std::result::Result<PageRecord, ApiError> {
            self.calls.push(Call::Create(payload.clone()));
            if self.failing_creates.contains(&payload.name) {
                return Err(api_error("pages"));
            }
            self.next_id += 1;
            Ok(PageRecord {
                id: 1000 + self.next_id,
                name: payload.name.clone(),
                book_id: payload.book_id,
                chapter_id: payload.chapter_id,
            })
        }

        fn update_page(
            &mut self,
            page_id: u64,
            payload: &PagePayload,
        ) -> std::result::Result<PageRecord, ApiError> {
            self.calls.push(Call::Update(page_id, payload.clone()));
            if self.failing_updates.contains(&page_id) {
                return Err(api_error(&format!("pages/{page_id}")));
            }
            Ok(PageRecord {
                id: page_id,
                name: payload.name.clone(),
                book_id: payload.book_id,
                chapter_id: payload.chapter_id,
            })
        }

        fn request_count(&self) -> usize {
            self.calls.len()
        }
    }

    impl MockApi {
        fn writes(&self) -> Vec<&Call> {
            self.calls
                .iter()
                .filter(|call| matches!(call, Call::Create(_) | Call::Update(..)))
                .collect()
        }
    }

    fn page(name: &str, content: &str) -> Page {
        Page {
            name: name.to_string(),
            content: content.to_string(),
            source: PathBuf::from(format!("docs/{}.md", name.to_lowercase())),
        }
    }

    fn summary(id: u64, name: &str) -> PageSummary {
        PageSummary {
            id,
            name: name.to_string(),
        }
    }

    fn chapter_target(chapter_id: u64) -> UpsertTarget {
        UpsertTarget {
            book_id: None,
            chapter_id: Some(chapter_id),
        }
    }

    fn api_with_chapter(chapter_id: u64, pages: Vec<PageSummary>) -> MockApi {
        let mut api = MockApi::default();
        api.chapters.insert(chapter_id, ChapterDetail { pages });
        api
    }

    #[test]
    fn chapter_inventory_collects_all_pages_last_wins() {
        let mut api = api_with_chapter(
            7,
            vec![summary(1, "Intro"), summary(2, "Setup"), summary(3, "Intro")],
        );
        let inventory = fetch_inventory(&mut api, &chapter_target(7)).expect("inventory");
        assert_eq!(inventory.len(), 2);
        assert_eq!(inventory.get("Intro"), Some(&3));
        assert_eq!(inventory.get("Setup"), Some(&2));
        assert_eq!(api.calls, vec![Call::GetChapter(7)]);
    }

    #[test]
    fn book_inventory_skips_chapters() {
        let mut api = MockApi::default();
        api.books.insert(
            3,
            BookDetail {
                contents: vec![
                    BookContent {
                        kind: "chapter".to_string(),
                        id: 40,
                        name: "Guides".to_string(),
                    },
                    BookContent {
                        kind: "page".to_string(),
                        id: 41,
                        name: "Intro".to_string(),
                    },
                ],
            },
        );
        let target = UpsertTarget {
            book_id: Some(3),
            chapter_id: None,
        };
        let inventory = fetch_inventory(&mut api, &target).expect("inventory");
        assert_eq!(inventory, Inventory::from([("Intro".to_string(), 41)]));
        assert_eq!(api.calls, vec![Call::GetBook(3)]);
    }

    #[test]
    fn missing_container_fails_before_any_request() {
        let mut api = MockApi::default();
        let error = upsert_pages(
            &mut api,
            &UpsertTarget::default(),
            &[page("Intro", "x")],
            &UpsertOptions::default(),
        )
        .expect_err("must fail");
        assert!(matches!(error, SyncError::Configuration(_)));
        assert!(api.calls.is_empty());
    }

    #[test]
    fn fetch_failure_issues_no_writes() {
        let mut api = MockApi::default();
        let error = upsert_pages(
            &mut api,
            &chapter_target(99),
            &[page("Intro", "x"), page("New", "y")],
            &UpsertOptions::default(),
        )
        .expect_err("must fail");
        match error {
            SyncError::RemoteFetch { container, .. } => assert_eq!(container, "chapter 99"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(api.writes().is_empty());
    }

    #[test]
    fn existing_name_is_updated_and_new_name_is_created_in_order() {
        let mut api = api_with_chapter(7, vec![summary(5, "Intro")]);
        let report = upsert_pages(
            &mut api,
            &chapter_target(7),
            &[page("Intro", "hello"), page("New", "fresh")],
            &UpsertOptions::default(),
        )
        .expect("upsert");

        let writes = api.writes();
        assert_eq!(writes.len(), 2);
        assert!(matches!(writes[0], Call::Update(5, payload) if payload.name == "Intro"));
        assert!(matches!(writes[1], Call::Create(payload) if payload.name == "New"));
        assert_eq!(report.updated, 1);
        assert_eq!(report.created, 1);
        assert_eq!(report.inventory_size, 1);
        assert_eq!(report.pages[1].page_id, Some(1001));
    }

    #[test]
    fn update_failure_is_recorded_and_loop_continues() {
        let mut api = api_with_chapter(7, vec![summary(5, "A")]);
        api.failing_updates.insert(5);

        let report = upsert_pages(
            &mut api,
            &chapter_target(7),
            &[page("A", "a"), page("B", "b")],
            &UpsertOptions::default(),
        )
        .expect("upsert");

        assert_eq!(report.update_failures, 1);
        assert_eq!(report.created, 1);
        assert_eq!(report.pages[0].action, PageAction::UpdateFailed);
        assert!(
            report.pages[0]
                .detail
                .as_deref()
                .is_some_and(|detail| detail.contains("500"))
        );
        assert_eq!(report.pages[1].action, PageAction::Created);
        assert_eq!(api.writes().len(), 2);
    }

    #[test]
    fn abort_policy_makes_update_failures_fatal() {
        let mut api = api_with_chapter(7, vec![summary(5, "A")]);
        api.failing_updates.insert(5);

        let error = upsert_pages(
            &mut api,
            &chapter_target(7),
            &[page("A", "a"), page("B", "b")],
            &UpsertOptions {
                update_failure_policy: UpdateFailurePolicy::Abort,
                ..UpsertOptions::default()
            },
        )
        .expect_err("must fail");

        assert!(matches!(error, SyncError::PageUpdate { id: 5, .. }));
        assert_eq!(api.writes().len(), 1);
    }

    #[test]
    fn create_failure_stops_remaining_pages() {
        let mut api = api_with_chapter(7, vec![summary(5, "Later")]);
        api.failing_creates.insert("Broken".to_string());

        let error = upsert_pages(
            &mut api,
            &chapter_target(7),
            &[page("First", "1"), page("Broken", "2"), page("Later", "3")],
            &UpsertOptions::default(),
        )
        .expect_err("must fail");

        assert!(matches!(error, SyncError::PageCreate { ref name, .. } if name == "Broken"));
        let writes = api.writes();
        assert_eq!(writes.len(), 2);
        assert!(
            !writes
                .iter()
                .any(|call| matches!(call, Call::Update(5, _)))
        );
    }

    #[test]
    fn payload_carries_both_ids_and_optional_tags() {
        let target = UpsertTarget {
            book_id: Some(3),
            chapter_id: Some(7),
        };
        let payload = build_payload(&target, &page("Intro", "body"), &[]);
        assert_eq!(payload.book_id, Some(3));
        assert_eq!(payload.chapter_id, Some(7));
        assert_eq!(payload.markdown, "body");
        assert!(payload.tags.is_empty());

        let tagged = build_payload(&target, &page("Intro", "body"), &["api".to_string()]);
        assert_eq!(
            tagged.tags,
            vec![PageTag {
                name: "api".to_string(),
                value: String::new()
            }]
        );
    }

    #[test]
    fn both_ids_list_chapter_but_attach_both() {
        let mut api = api_with_chapter(7, Vec::new());
        let target = UpsertTarget {
            book_id: Some(3),
            chapter_id: Some(7),
        };
        upsert_pages(&mut api, &target, &[page("New", "n")], &UpsertOptions::default())
            .expect("upsert");

        assert_eq!(api.calls[0], Call::GetChapter(7));
        match &api.calls[1] {
            Call::Create(payload) => {
                assert_eq!(payload.book_id, Some(3));
                assert_eq!(payload.chapter_id, Some(7));
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[test]
    fn dry_run_fetches_inventory_but_writes_nothing() {
        let mut api = api_with_chapter(7, vec![summary(5, "Intro")]);
        let report = upsert_pages(
            &mut api,
            &chapter_target(7),
            &[page("Intro", "x"), page("New", "y")],
            &UpsertOptions {
                dry_run: true,
                ..UpsertOptions::default()
            },
        )
        .expect("upsert");

        assert_eq!(api.calls, vec![Call::GetChapter(7)]);
        assert_eq!(report.pages[0].action, PageAction::WouldUpdate);
        assert_eq!(report.pages[0].page_id, Some(5));
        assert_eq!(report.pages[1].action, PageAction::WouldCreate);
        assert_eq!(report.created + report.updated, 0);
    }
}

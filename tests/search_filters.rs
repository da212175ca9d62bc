//! Issue search materialization tests with real `SQLite` (no mocks).
//!
//! Each test seeds a small fixture graph and asserts on the exact result
//! set of one filter dimension or one interaction between dimensions.

mod common;

use common::{fixtures, seed_project, test_db};
use forgeboard::model::{
    Direction, MentionResource, Milestone, ProjectVisibility, State, ANONYMOUS_USER_ID,
};
use forgeboard::search::SearchCondition;
use forgeboard::storage::SqliteStorage;

fn ids(issues: &[forgeboard::model::Issue]) -> Vec<i64> {
    issues.iter().map(|i| i.id).collect()
}

fn sorted_ids(issues: &[forgeboard::model::Issue]) -> Vec<i64> {
    let mut v = ids(issues);
    v.sort_unstable();
    v
}

// ============================================================================
// AUTHOR / ASSIGNEE
// ============================================================================

#[test]
fn author_filter_returns_exactly_their_issues() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");
    let alice = storage.add_user("alice", "Alice").unwrap();
    let bob = storage.add_user("bob", "Bob").unwrap();

    let mut by_alice = fixtures::issue(project_id, "alice one", 0);
    by_alice.author_id = Some(alice);
    let alice_id = storage.create_issue(&by_alice).unwrap();

    let mut by_bob = fixtures::issue(project_id, "bob one", 1);
    by_bob.author_id = Some(bob);
    storage.create_issue(&by_bob).unwrap();

    let cond = SearchCondition::new().with_author_id(alice);
    let found = storage.search_in_project(&cond, project_id).unwrap();
    assert_eq!(ids(&found), vec![alice_id]);

    // Same filter, unscoped materialization.
    let found = storage.search_all(&cond).unwrap();
    assert_eq!(ids(&found), vec![alice_id]);
}

#[test]
fn anonymous_author_sentinel_means_no_author() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");
    let alice = storage.add_user("alice", "Alice").unwrap();

    let orphan_id = storage
        .create_issue(&fixtures::issue(project_id, "no author", 0))
        .unwrap();
    let mut authored = fixtures::issue(project_id, "authored", 1);
    authored.author_id = Some(alice);
    storage.create_issue(&authored).unwrap();

    let cond = SearchCondition::new().with_author_id(ANONYMOUS_USER_ID);
    let found = storage.search_in_project(&cond, project_id).unwrap();
    assert_eq!(ids(&found), vec![orphan_id]);
}

#[test]
fn anonymous_assignee_sentinel_means_unassigned() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");
    let alice = storage.add_user("alice", "Alice").unwrap();

    let unassigned_id = storage
        .create_issue(&fixtures::issue(project_id, "floating", 0))
        .unwrap();
    let mut assigned = fixtures::issue(project_id, "taken", 1);
    assigned.assignee_id = Some(alice);
    let assigned_id = storage.create_issue(&assigned).unwrap();

    let cond = SearchCondition::new().with_assignee_id(ANONYMOUS_USER_ID);
    let found = storage.search_in_project(&cond, project_id).unwrap();
    assert_eq!(ids(&found), vec![unassigned_id]);

    let cond = SearchCondition::new().with_assignee_id(alice);
    let found = storage.search_in_project(&cond, project_id).unwrap();
    assert_eq!(ids(&found), vec![assigned_id]);
}

// ============================================================================
// COMMENTER / MENTION
// ============================================================================

#[test]
fn commenter_with_no_comments_matches_nothing() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");
    let lurker = storage.add_user("lurker", "Lurker").unwrap();
    storage
        .create_issue(&fixtures::issue(project_id, "quiet", 0))
        .unwrap();

    let cond = SearchCondition::new().with_commenter_id(lurker);
    assert!(storage.search_in_project(&cond, project_id).unwrap().is_empty());
    assert!(storage.search_all(&cond).unwrap().is_empty());
}

#[test]
fn commenter_filter_follows_comments_to_issues() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");
    let other_project = seed_project(&mut storage, "venus");
    let alice = storage.add_user("alice", "Alice").unwrap();

    let here = storage
        .create_issue(&fixtures::issue(project_id, "here", 0))
        .unwrap();
    let elsewhere = storage
        .create_issue(&fixtures::issue(other_project, "elsewhere", 1))
        .unwrap();
    storage.add_comment(here, alice, "ping").unwrap();
    storage.add_comment(elsewhere, alice, "pong").unwrap();

    let cond = SearchCondition::new().with_commenter_id(alice);

    // Project scope constrains resolution to the project.
    let found = storage.search_in_project(&cond, project_id).unwrap();
    assert_eq!(ids(&found), vec![here]);

    // Unscoped sees both.
    let found = storage.search_all(&cond).unwrap();
    assert_eq!(sorted_ids(&found), vec![here, elsewhere]);
}

#[test]
fn anonymous_commenter_applies_no_filter() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");
    storage
        .create_issue(&fixtures::issue(project_id, "one", 0))
        .unwrap();
    storage
        .create_issue(&fixtures::issue(project_id, "two", 1))
        .unwrap();

    let cond = SearchCondition::new().with_commenter_id(ANONYMOUS_USER_ID);
    assert_eq!(storage.search_in_project(&cond, project_id).unwrap().len(), 2);
}

#[test]
fn mention_filter_covers_posts_and_comment_backlinks() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");
    let alice = storage.add_user("alice", "Alice").unwrap();
    let bob = storage.add_user("bob", "Bob").unwrap();

    let in_post = storage
        .create_issue(&fixtures::issue(project_id, "mentioned in post", 0))
        .unwrap();
    let in_comment = storage
        .create_issue(&fixtures::issue(project_id, "mentioned in comment", 1))
        .unwrap();
    let unrelated = storage
        .create_issue(&fixtures::issue(project_id, "unrelated", 2))
        .unwrap();

    storage
        .add_mention(alice, &MentionResource::IssuePost, in_post)
        .unwrap();
    let comment_id = storage.add_comment(in_comment, bob, "hey @alice").unwrap();
    storage
        .add_mention(alice, &MentionResource::IssueComment, comment_id)
        .unwrap();
    // Unsupported resource types are skipped, not fatal.
    storage
        .add_mention(alice, &MentionResource::Other("wiki_page".to_string()), 77)
        .unwrap();

    let cond = SearchCondition::new().with_mention_id(alice);
    let found = storage.search_in_project(&cond, project_id).unwrap();
    assert_eq!(sorted_ids(&found), vec![in_post, in_comment]);
    assert!(!ids(&found).contains(&unrelated));
}

#[test]
fn mention_user_with_no_mentions_matches_nothing() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");
    let ghost = storage.add_user("ghost", "Ghost").unwrap();
    storage
        .create_issue(&fixtures::issue(project_id, "quiet", 0))
        .unwrap();

    let cond = SearchCondition::new().with_mention_id(ghost);
    assert!(storage.search_in_project(&cond, project_id).unwrap().is_empty());
}

// ============================================================================
// STATE / COMMENT COUNT / DUE DATE
// ============================================================================

#[test]
fn state_filter_open_closed_all() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");

    let open_id = storage
        .create_issue(&fixtures::issue(project_id, "open", 0))
        .unwrap();
    let closed_id = storage
        .create_issue(&fixtures::issue(project_id, "closed", 1))
        .unwrap();
    storage.set_issue_state(closed_id, State::Closed).unwrap();

    let found = storage
        .search_in_project(&SearchCondition::new().with_state(State::Open), project_id)
        .unwrap();
    assert_eq!(ids(&found), vec![open_id]);

    let found = storage
        .search_in_project(&SearchCondition::new().with_state(State::Closed), project_id)
        .unwrap();
    assert_eq!(ids(&found), vec![closed_id]);

    let found = storage
        .search_in_project(&SearchCondition::new().with_state(State::All), project_id)
        .unwrap();
    assert_eq!(sorted_ids(&found), vec![open_id, closed_id]);

    // Unrecognized request tokens behave like All.
    let found = storage
        .search_in_project(
            &SearchCondition::new().with_state_param("everything"),
            project_id,
        )
        .unwrap();
    assert_eq!(found.len(), 2);
}

#[test]
fn commented_flag_requires_at_least_one_comment() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");
    let alice = storage.add_user("alice", "Alice").unwrap();

    let discussed = storage
        .create_issue(&fixtures::issue(project_id, "discussed", 0))
        .unwrap();
    storage
        .create_issue(&fixtures::issue(project_id, "silent", 1))
        .unwrap();
    storage.add_comment(discussed, alice, "first!").unwrap();

    let cond = SearchCondition::new().with_commented(true);
    let found = storage.search_in_project(&cond, project_id).unwrap();
    assert_eq!(ids(&found), vec![discussed]);
}

#[test]
fn due_date_filter_is_an_inclusive_day_bound() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");

    let mut on_day = fixtures::issue(project_id, "due on the day", 0);
    on_day.due_date = Some(fixtures::date("2024-05-10"));
    let on_day_id = storage.create_issue(&on_day).unwrap();

    let mut before = fixtures::issue(project_id, "due before", 1);
    before.due_date = Some(fixtures::date("2024-05-01"));
    let before_id = storage.create_issue(&before).unwrap();

    let mut after = fixtures::issue(project_id, "due after", 2);
    after.due_date = Some(fixtures::date("2024-05-11"));
    storage.create_issue(&after).unwrap();

    let cond = SearchCondition::new().with_due_date(fixtures::date("2024-05-10"));
    let found = storage.search_in_project(&cond, project_id).unwrap();
    assert_eq!(sorted_ids(&found), vec![on_day_id, before_id]);
}

// ============================================================================
// FREE TEXT
// ============================================================================

#[test]
fn free_text_matches_title_body_and_comments() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");
    let alice = storage.add_user("alice", "Alice").unwrap();

    let mut in_title = fixtures::issue(project_id, "Segfault on startup", 0);
    in_title.body = "boots fine otherwise".to_string();
    let in_title_id = storage.create_issue(&in_title).unwrap();

    let mut in_body = fixtures::issue(project_id, "crash report", 1);
    in_body.body = "looks like a segfault in the parser".to_string();
    let in_body_id = storage.create_issue(&in_body).unwrap();

    let in_comment_id = storage
        .create_issue(&fixtures::issue(project_id, "weird behavior", 2))
        .unwrap();
    storage
        .add_comment(in_comment_id, alice, "reproduced, it is a SEGFAULT")
        .unwrap();

    storage
        .create_issue(&fixtures::issue(project_id, "docs typo", 3))
        .unwrap();

    let cond = SearchCondition::new().with_filter("segfault");
    let found = storage.search_in_project(&cond, project_id).unwrap();
    assert_eq!(sorted_ids(&found), vec![in_title_id, in_body_id, in_comment_id]);
}

#[test]
fn free_text_comment_match_respects_project_scope() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");
    let other_project = seed_project(&mut storage, "venus");
    let alice = storage.add_user("alice", "Alice").unwrap();

    let local = storage
        .create_issue(&fixtures::issue(project_id, "local", 0))
        .unwrap();
    let remote = storage
        .create_issue(&fixtures::issue(other_project, "remote", 1))
        .unwrap();
    storage.add_comment(local, alice, "keyword inside").unwrap();
    storage.add_comment(remote, alice, "keyword inside").unwrap();

    let cond = SearchCondition::new().with_filter("keyword");
    let found = storage.search_in_project(&cond, project_id).unwrap();
    assert_eq!(ids(&found), vec![local]);

    let found = storage.search_all(&cond).unwrap();
    assert_eq!(sorted_ids(&found), vec![local, remote]);
}

#[test]
fn blank_filter_is_ignored() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");
    storage
        .create_issue(&fixtures::issue(project_id, "anything", 0))
        .unwrap();

    let cond = SearchCondition::new().with_filter("   ");
    assert_eq!(storage.search_in_project(&cond, project_id).unwrap().len(), 1);
}

// ============================================================================
// MILESTONE / LABELS
// ============================================================================

#[test]
fn milestone_filter_exact_and_null_sentinel() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");
    let milestone_id = storage
        .create_milestone(&fixtures::milestone(project_id, "v1.0", None))
        .unwrap();

    let mut planned = fixtures::issue(project_id, "planned", 0);
    planned.milestone_id = Some(milestone_id);
    let planned_id = storage.create_issue(&planned).unwrap();

    let backlog_id = storage
        .create_issue(&fixtures::issue(project_id, "backlog", 1))
        .unwrap();

    let cond = SearchCondition::new().with_milestone_id(milestone_id);
    let found = storage.search_in_project(&cond, project_id).unwrap();
    assert_eq!(ids(&found), vec![planned_id]);

    let cond = SearchCondition::new().with_milestone_id(Milestone::NULL_MILESTONE_ID);
    let found = storage.search_in_project(&cond, project_id).unwrap();
    assert_eq!(ids(&found), vec![backlog_id]);
}

#[test]
fn label_filter_matches_issues_carrying_any_requested_label() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");
    let bug = storage.add_label(project_id, "type", "bug").unwrap();
    let urgent = storage.add_label(project_id, "priority", "urgent").unwrap();
    let docs = storage.add_label(project_id, "type", "docs").unwrap();

    let bug_issue = storage
        .create_issue(&fixtures::issue(project_id, "a bug", 0))
        .unwrap();
    storage.add_issue_label(bug_issue, bug).unwrap();

    let urgent_issue = storage
        .create_issue(&fixtures::issue(project_id, "urgent thing", 1))
        .unwrap();
    storage.add_issue_label(urgent_issue, urgent).unwrap();

    let docs_issue = storage
        .create_issue(&fixtures::issue(project_id, "docs fix", 2))
        .unwrap();
    storage.add_issue_label(docs_issue, docs).unwrap();

    storage
        .create_issue(&fixtures::issue(project_id, "unlabeled", 3))
        .unwrap();

    let cond = SearchCondition::new().with_label_ids([bug, urgent]);
    let found = storage.search_in_project(&cond, project_id).unwrap();
    assert_eq!(sorted_ids(&found), vec![bug_issue, urgent_issue]);
}

#[test]
fn unresolvable_label_ids_match_nothing() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");
    storage
        .create_issue(&fixtures::issue(project_id, "anything", 0))
        .unwrap();

    let cond = SearchCondition::new().with_label_ids([9999]);
    assert!(storage.search_in_project(&cond, project_id).unwrap().is_empty());
}

// ============================================================================
// ORDERING / PAGING
// ============================================================================

#[test]
fn due_date_ordering_keeps_nulls_last_in_both_directions() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");

    let mut early = fixtures::issue(project_id, "early", 0);
    early.due_date = Some(fixtures::date("2024-01-01"));
    let early_id = storage.create_issue(&early).unwrap();

    let mut late = fixtures::issue(project_id, "late", 1);
    late.due_date = Some(fixtures::date("2024-12-01"));
    let late_id = storage.create_issue(&late).unwrap();

    let undated_id = storage
        .create_issue(&fixtures::issue(project_id, "undated", 2))
        .unwrap();

    let asc = SearchCondition::new()
        .with_order_by("due_date")
        .with_order_dir(Direction::Asc);
    let found = storage.search_in_project(&asc, project_id).unwrap();
    assert_eq!(ids(&found), vec![early_id, late_id, undated_id]);

    let desc = SearchCondition::new()
        .with_order_by("due_date")
        .with_order_dir(Direction::Desc);
    let found = storage.search_in_project(&desc, project_id).unwrap();
    assert_eq!(ids(&found), vec![late_id, early_id, undated_id]);
}

#[test]
fn default_ordering_is_newest_first() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");

    let older = storage
        .create_issue(&fixtures::issue(project_id, "older", 5))
        .unwrap();
    let newer = storage
        .create_issue(&fixtures::issue(project_id, "newer", 1))
        .unwrap();

    let found = storage
        .search_in_project(&SearchCondition::new(), project_id)
        .unwrap();
    assert_eq!(ids(&found), vec![newer, older]);
}

#[test]
fn limit_and_page_offset() {
    let mut storage = test_db();
    let project_id = seed_project(&mut storage, "mercury");

    let mut created = Vec::new();
    for n in 0..5 {
        created.push(
            storage
                .create_issue(&fixtures::issue(project_id, &format!("issue {n}"), n))
                .unwrap(),
        );
    }

    let first_page = storage
        .search_in_project(&SearchCondition::new().with_limit(2), project_id)
        .unwrap();
    assert_eq!(ids(&first_page), vec![created[0], created[1]]);

    let second_page = storage
        .search_in_project(
            &SearchCondition::new().with_limit(2).with_page(1),
            project_id,
        )
        .unwrap();
    assert_eq!(ids(&second_page), vec![created[2], created[3]]);
}

// ============================================================================
// ORGANIZATION SCOPE
// ============================================================================

struct OrgFixture {
    org_id: i64,
    member: i64,
    public_issue: i64,
    private_issue: i64,
}

fn seed_org(storage: &mut SqliteStorage) -> OrgFixture {
    let org_id = storage.add_organization("acme").unwrap();
    let member = storage.add_user("member", "Member").unwrap();

    let public_project = storage
        .add_project(Some(org_id), "website", ProjectVisibility::Public)
        .unwrap();
    let private_project = storage
        .add_project(Some(org_id), "skunkworks", ProjectVisibility::Private)
        .unwrap();
    storage.add_project_member(private_project, member).unwrap();

    let public_issue = storage
        .create_issue(&fixtures::issue(public_project, "public work", 0))
        .unwrap();
    let private_issue = storage
        .create_issue(&fixtures::issue(private_project, "secret work", 1))
        .unwrap();

    OrgFixture {
        org_id,
        member,
        public_issue,
        private_issue,
    }
}

#[test]
fn organization_scope_respects_visibility() {
    let mut storage = test_db();
    let org = seed_org(&mut storage);
    let outsider = storage.add_user("outsider", "Outsider").unwrap();

    let cond = SearchCondition::new();

    let found = storage
        .search_in_organization(&cond, org.org_id, org.member)
        .unwrap();
    assert_eq!(sorted_ids(&found), vec![org.public_issue, org.private_issue]);

    let found = storage
        .search_in_organization(&cond, org.org_id, outsider)
        .unwrap();
    assert_eq!(ids(&found), vec![org.public_issue]);

    let found = storage
        .search_in_organization(&cond, org.org_id, ANONYMOUS_USER_ID)
        .unwrap();
    assert_eq!(ids(&found), vec![org.public_issue]);
}

#[test]
fn organization_allowlist_intersects_with_visibility() {
    let mut storage = test_db();
    let org = seed_org(&mut storage);
    let outsider = storage.add_user("outsider", "Outsider").unwrap();

    // Allowlist names are matched case-insensitively.
    let cond = SearchCondition::new()
        .with_project_names(["SKUNKWORKS".to_string(), "website".to_string()]);

    let found = storage
        .search_in_organization(&cond, org.org_id, org.member)
        .unwrap();
    assert_eq!(sorted_ids(&found), vec![org.public_issue, org.private_issue]);

    // The outsider's allowlist still cannot reach the private project.
    let found = storage
        .search_in_organization(&cond, org.org_id, outsider)
        .unwrap();
    assert_eq!(ids(&found), vec![org.public_issue]);

    // An allowlist that resolves to nothing visible matches nothing.
    let cond = SearchCondition::new().with_project_names(["skunkworks".to_string()]);
    let found = storage
        .search_in_organization(&cond, org.org_id, outsider)
        .unwrap();
    assert!(found.is_empty());
}

#[test]
fn organization_scope_composes_with_other_filters() {
    let mut storage = test_db();
    let org = seed_org(&mut storage);
    let alice = storage.add_user("alice", "Alice").unwrap();
    storage.add_comment(org.public_issue, alice, "seen it").unwrap();

    let cond = SearchCondition::new().with_commenter_id(alice);
    let found = storage
        .search_in_organization(&cond, org.org_id, org.member)
        .unwrap();
    assert_eq!(ids(&found), vec![org.public_issue]);

    let cond = SearchCondition::new().with_filter("secret");
    let found = storage
        .search_in_organization(&cond, org.org_id, org.member)
        .unwrap();
    assert_eq!(ids(&found), vec![org.private_issue]);
}

#[test]
fn empty_organization_matches_nothing() {
    let mut storage = test_db();
    let org_id = storage.add_organization("empty").unwrap();
    let viewer = storage.add_user("viewer", "Viewer").unwrap();

    let lone_project = seed_project(&mut storage, "independent");
    storage
        .create_issue(&fixtures::issue(lone_project, "outside org", 0))
        .unwrap();

    let found = storage
        .search_in_organization(&SearchCondition::new(), org_id, viewer)
        .unwrap();
    assert!(found.is_empty());
}

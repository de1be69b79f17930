use super::*;
use crate::{
    error::{ExecutionError, ResultShapeError},
    query::QueryStatistics,
    transport::GetDocumentsResult,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    id: String,
    name: String,
}

#[derive(Default)]
struct MockExecutor {
    responses: RefCell<VecDeque<CommandResult>>,
    commands: RefCell<Vec<Command>>,
}

impl MockExecutor {
    fn respond(&self, result: CommandResult) {
        self.responses.borrow_mut().push_back(result);
    }

    fn commands(&self) -> Vec<Command> {
        self.commands.borrow().clone()
    }
}

impl RequestExecutor for MockExecutor {
    fn execute(&self, command: &Command) -> Result<CommandResult, ExecutionError> {
        self.commands.borrow_mut().push(command.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| ExecutionError::Transport {
                message: "no canned response".to_string(),
            })
    }
}

fn session_with(executor: &Rc<MockExecutor>) -> DocumentSession {
    let executor: Rc<dyn RequestExecutor> = Rc::clone(executor) as Rc<dyn RequestExecutor>;
    DocumentSession::new(executor, Rc::new(DocumentConventions::new()))
}

fn user_doc(id: &str, name: &str) -> Value {
    json!({"id": id, "name": name, "@metadata": {"@id": id}})
}

fn documents_result(results: Vec<Value>) -> CommandResult {
    CommandResult::GetDocuments(GetDocumentsResult {
        results,
        includes: BTreeMap::new(),
    })
}

fn query_result(results: Vec<Value>, total: i64) -> CommandResult {
    CommandResult::Query(QueryResult {
        results,
        total_results: total,
        index_name: "Auto/Users".to_string(),
        ..QueryResult::default()
    })
}

#[test]
fn load_deduplicates_ids_case_insensitively() {
    let executor = Rc::new(MockExecutor::default());
    let session = session_with(&executor);
    executor.respond(documents_result(vec![
        user_doc("users/1", "a"),
        user_doc("users/2", "b"),
    ]));

    let loaded = session
        .load_many::<User>(&["users/1", "Users/1", "users/2"])
        .unwrap();
    assert_eq!(loaded.len(), 3);
    assert!(loaded.iter().all(Option::is_some));

    let commands = executor.commands();
    assert_eq!(commands.len(), 1);
    match &commands[0] {
        Command::GetDocuments { ids, .. } => {
            assert_eq!(ids, &["users/1".to_string(), "users/2".to_string()]);
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn second_load_of_a_tracked_id_skips_the_transport() {
    let executor = Rc::new(MockExecutor::default());
    let session = session_with(&executor);
    executor.respond(documents_result(vec![user_doc("users/1", "a")]));

    let first = session.load::<User>("users/1").unwrap();
    assert_eq!(first.map(|user| user.name), Some("a".to_string()));

    let second = session.load::<User>("USERS/1").unwrap();
    assert!(second.is_some());
    assert_eq!(executor.commands().len(), 1);
    assert_eq!(session.number_of_requests(), 1);
}

#[test]
fn blank_id_resolves_locally_to_absent() {
    let executor = Rc::new(MockExecutor::default());
    let session = session_with(&executor);

    assert!(session.load::<User>("").unwrap().is_none());
    assert!(session.load::<User>("   ").unwrap().is_none());
    assert!(executor.commands().is_empty());
}

#[test]
fn deleted_ids_never_reach_the_wire() {
    let executor = Rc::new(MockExecutor::default());
    let session = session_with(&executor);
    session.delete_by_id("users/1");

    assert!(session.load::<User>("users/1").unwrap().is_none());
    assert!(executor.commands().is_empty());
}

#[test]
fn missing_ids_are_recorded_and_not_refetched() {
    let executor = Rc::new(MockExecutor::default());
    let session = session_with(&executor);
    executor.respond(documents_result(Vec::new()));

    assert!(session.load::<User>("users/404").unwrap().is_none());
    assert_eq!(executor.commands().len(), 1);

    // Known-missing now; no second round trip.
    assert!(session.load::<User>("users/404").unwrap().is_none());
    assert_eq!(executor.commands().len(), 1);
}

#[test]
fn includes_register_before_results_and_satisfy_later_loads() {
    let executor = Rc::new(MockExecutor::default());
    let session = session_with(&executor);

    let mut includes = BTreeMap::new();
    includes.insert("users/2".to_string(), user_doc("users/2", "boss"));
    executor.respond(CommandResult::GetDocuments(GetDocumentsResult {
        results: vec![user_doc("users/1", "a")],
        includes,
    }));

    let loaded = session
        .load_with_includes::<User>("users/1", &["boss"])
        .unwrap();
    assert!(loaded.is_some());

    let boss = session.load::<User>("users/2").unwrap();
    assert_eq!(boss.map(|user| user.name), Some("boss".to_string()));
    assert_eq!(executor.commands().len(), 1);
}

#[test]
fn query_results_are_tracked_in_the_identity_map() {
    let executor = Rc::new(MockExecutor::default());
    let session = session_with(&executor);
    executor.respond(query_result(vec![user_doc("users/1", "a")], 1));

    let mut query = session.query_collection::<User>("Users");
    let results = query.get_results().unwrap();
    assert_eq!(results.len(), 1);

    // Tracked by the query; the load stays local.
    assert!(session.load::<User>("users/1").unwrap().is_some());
    assert_eq!(executor.commands().len(), 1);
}

#[test]
fn no_tracking_queries_leave_the_identity_map_alone() {
    let executor = Rc::new(MockExecutor::default());
    let session = session_with(&executor);
    executor.respond(query_result(vec![user_doc("users/1", "a")], 1));

    let mut query = session.query_collection::<User>("Users").no_tracking();
    query.get_results().unwrap();
    assert!(!session.is_loaded("users/1"));
}

#[test]
fn count_requests_zero_results_without_shrinking_an_explicit_page_size() {
    let executor = Rc::new(MockExecutor::default());
    let session = session_with(&executor);
    executor.respond(query_result(Vec::new(), 7));

    let mut query = session.query_collection::<User>("Users").take(50);
    assert_eq!(query.count().unwrap(), 7);

    match &executor.commands()[0] {
        Command::Query(index_query) => assert_eq!(index_query.page_size, Some(50)),
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn first_and_single_validate_result_shape() {
    let executor = Rc::new(MockExecutor::default());
    let session = session_with(&executor);

    executor.respond(query_result(Vec::new(), 0));
    let err = session
        .query_collection::<User>("Users")
        .first()
        .unwrap_err();
    assert!(matches!(
        err,
        QueryError::ResultShape(ResultShapeError::Empty)
    ));

    executor.respond(query_result(
        vec![user_doc("users/1", "a"), user_doc("users/2", "b")],
        2,
    ));
    let err = session
        .query_collection::<User>("Users")
        .single()
        .unwrap_err();
    assert!(matches!(
        err,
        QueryError::ResultShape(ResultShapeError::NotSingle { count: 2 })
    ));
}

#[test]
fn repeated_terminals_reuse_the_cached_operation() {
    let executor = Rc::new(MockExecutor::default());
    let session = session_with(&executor);
    executor.respond(query_result(vec![user_doc("users/1", "a")], 1));

    let mut query = session.query_collection::<User>("Users");
    let first = query.get_results().unwrap();
    let second = query.get_results().unwrap();
    assert_eq!(first, second);
    assert_eq!(executor.commands().len(), 1);
}

#[test]
fn statistics_targets_refresh_after_execution() {
    let executor = Rc::new(MockExecutor::default());
    let session = session_with(&executor);
    executor.respond(query_result(vec![user_doc("users/1", "a")], 42));

    let stats = Rc::new(RefCell::new(QueryStatistics::default()));
    let mut query = session
        .query_collection::<User>("Users")
        .statistics(Rc::clone(&stats));
    query.get_results().unwrap();

    assert_eq!(stats.borrow().total_results, 42);
    assert_eq!(stats.borrow().index_name, "Auto/Users");
}

#[test]
fn lazy_handles_flush_together_in_registration_order() {
    let executor = Rc::new(MockExecutor::default());
    let session = session_with(&executor);

    let users = session
        .query_collection::<User>("Users")
        .lazily()
        .unwrap();
    let count = session
        .query_collection::<User>("Users")
        .count_lazily()
        .unwrap();
    assert!(executor.commands().is_empty());

    executor.respond(CommandResult::MultiQuery(vec![
        QueryResult {
            results: vec![user_doc("users/1", "a")],
            total_results: 1,
            ..QueryResult::default()
        },
        QueryResult {
            total_results: 9,
            ..QueryResult::default()
        },
    ]));

    // Resolving either handle flushes the whole batch at once.
    assert_eq!(count.value().unwrap(), 9);
    assert!(users.is_evaluated());
    assert_eq!(users.value().unwrap().len(), 1);

    let commands = executor.commands();
    assert_eq!(commands.len(), 1);
    match &commands[0] {
        Command::MultiQuery(queries) => {
            assert_eq!(queries.len(), 2);
            assert_eq!(queries[1].page_size, Some(0));
        }
        other => panic!("unexpected command {other:?}"),
    }

    // The lazy batch also tracked its results.
    assert!(session.is_loaded("users/1"));
}

#[test]
fn request_budget_is_enforced_per_session() {
    let executor = Rc::new(MockExecutor::default());
    let mut conventions = DocumentConventions::new();
    conventions.max_number_of_requests_per_session = 1;
    let executor_dyn: Rc<dyn RequestExecutor> = Rc::clone(&executor) as Rc<dyn RequestExecutor>;
    let session = DocumentSession::new(executor_dyn, Rc::new(conventions));

    executor.respond(documents_result(vec![user_doc("users/1", "a")]));
    session.load::<User>("users/1").unwrap();

    let err = session.load::<User>("users/2").unwrap_err();
    assert!(matches!(
        err,
        QueryError::Execution(ExecutionError::MaxRequests { limit: 1 })
    ));
    assert_eq!(executor.commands().len(), 1);
}

#[test]
fn transport_errors_propagate_unchanged() {
    let executor = Rc::new(MockExecutor::default());
    let session = session_with(&executor);

    let err = session.load::<User>("users/1").unwrap_err();
    assert!(matches!(
        err,
        QueryError::Execution(ExecutionError::Transport { .. })
    ));
}

#[test]
fn before_query_listeners_see_the_frozen_request() {
    let executor = Rc::new(MockExecutor::default());
    let session = session_with(&executor);
    executor.respond(query_result(Vec::new(), 0));

    let mut query = session.query_collection::<User>("Users");
    let handle = query.add_before_query_listener(Box::new(|index_query| {
        index_query.disable_caching = true;
    }));
    let removed = query.add_before_query_listener(Box::new(|index_query| {
        index_query.start = 99;
    }));
    query.remove_before_query_listener(removed);
    assert_ne!(handle, removed);

    query.get_results().unwrap();
    match &executor.commands()[0] {
        Command::Query(index_query) => {
            assert!(index_query.disable_caching);
            assert_eq!(index_query.start, 0);
        }
        other => panic!("unexpected command {other:?}"),
    }
}

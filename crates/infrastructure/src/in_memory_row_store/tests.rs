use std::collections::BTreeMap;

use keyward_application::{ExecutionEngine, Row};
use keyward_domain::{ChildNode, CollectionNode, FieldNode, Filter, TreeQuery};
use serde_json::{Value, json};

use super::InMemoryRowStore;

fn row(value: Value) -> Row {
    match value {
        Value::Object(object) => object,
        _ => Row::new(),
    }
}

fn store() -> InMemoryRowStore {
    let mut rows = BTreeMap::new();
    rows.insert(
        "articles".to_owned(),
        vec![
            row(json!({
                "id": 1, "title": "First", "status": "published", "owner": "u2", "secret": "a"
            })),
            row(json!({
                "id": 2, "title": "Second", "status": "draft", "owner": "u1", "secret": "b"
            })),
            row(json!({
                "id": 3, "title": "Third", "status": "draft", "owner": "u2", "secret": "c"
            })),
        ],
    );
    InMemoryRowStore::new(rows)
}

fn field(name: &str, when_case: Vec<usize>) -> ChildNode {
    let mut child = ChildNode::Field(FieldNode::new(name));
    child.set_when_case(when_case);
    child
}

#[tokio::test]
async fn filter_sort_and_paging_apply_to_the_root_collection() {
    let tree = CollectionNode::new("articles", vec![field("id", Vec::new())]).with_query(
        TreeQuery {
            filter: Some(Filter::new(json!({ "owner": { "_eq": "u2" } }))),
            sort: vec!["-id".to_owned()],
            limit: Some(1),
            ..TreeQuery::default()
        },
    );

    let rows = store().execute(&tree).await;

    assert!(rows.is_ok());
    assert_eq!(rows.unwrap_or_default(), vec![row(json!({ "id": 3 }))]);
}

#[tokio::test]
async fn fields_outside_the_matching_cases_are_nulled() {
    let mut tree = CollectionNode::new(
        "articles",
        vec![field("id", vec![0, 1]), field("secret", vec![1])],
    )
    .with_query(TreeQuery {
        sort: vec!["id".to_owned()],
        ..TreeQuery::default()
    });
    tree.cases = vec![
        Filter::new(json!({ "status": { "_eq": "published" } })),
        Filter::new(json!({ "owner": { "_eq": "u1" } })),
    ];

    let rows = store().execute(&tree).await.unwrap_or_default();

    assert_eq!(
        rows,
        vec![
            row(json!({ "id": 1, "secret": null })),
            row(json!({ "id": 2, "secret": "b" })),
            row(json!({ "id": 3, "secret": null })),
        ]
    );
}

#[tokio::test]
async fn unknown_collections_return_no_rows() {
    let store = InMemoryRowStore::new(BTreeMap::from([(
        "pages".to_owned(),
        vec![row(json!({ "id": 1 }))],
    )]));

    let rows = store
        .execute(&CollectionNode::new("articles", Vec::new()))
        .await;

    assert!(rows.is_ok());
    assert!(rows.unwrap_or_default().is_empty());
}

//! Behavioural checks every [`Store`] implementation must pass.
//!
//! Backends call [`run_all`] from their own tests with a factory that
//! returns a fresh, empty store for the given configuration.

use std::future::Future;
use std::ops::ControlFlow;

use crate::codec::Compression;
use crate::config::{StoreConfig, StoreOptions};
use crate::context::CallContext;
use crate::error::{StoreError, StoreResult};
use crate::traits::{read_bytes, write_bytes, Store};
use crate::walk::collect_into;

/// Run every check, each against its own fresh store.
pub async fn run_all<F, Fut>(make: F)
where
    F: Fn(StoreConfig) -> Fut,
    Fut: Future<Output = Box<dyn Store>>,
{
    let simple = || StoreConfig::new(StoreOptions::simple());

    walk_from_resumes_at_starting_point(make(simple()).await.as_ref()).await;
    walk_from_single_character_start(make(simple()).await.as_ref()).await;
    walk_from_rejects_start_outside_prefix(make(simple()).await.as_ref()).await;
    missing_object_is_not_found(make(simple()).await.as_ref()).await;
    walk_prefix_selects_names(make(simple()).await.as_ref()).await;
    walk_stops_and_propagates(make(simple()).await.as_ref()).await;
    list_files_honours_max(make(simple()).await.as_ref()).await;
    copy_and_delete(make(simple()).await.as_ref()).await;
    cancelled_context_fails_fast(make(simple()).await.as_ref()).await;
    walk_matches_sorted_filter(make(simple()).await.as_ref()).await;

    walk_orders_names_with_extension(
        make(StoreConfig::new(StoreOptions::new("gz", Compression::Gzip, true))).await.as_ref(),
    )
    .await;

    overwrite_off_keeps_first(make(StoreConfig::new(StoreOptions::dbin())).await.as_ref()).await;
    overwrite_on_replaces(make(simple()).await.as_ref()).await;

    for options in [
        StoreOptions::simple(),
        StoreOptions::dbin(),
        StoreOptions::jsonl(),
        StoreOptions::new("bin", Compression::None, true),
    ] {
        codec_preserves_bytes(make(StoreConfig::new(options)).await.as_ref()).await;
    }
}

async fn write_names(store: &dyn Store, cx: &CallContext, names: &[&str]) {
    for name in names {
        write_bytes(store, cx, name, name.as_bytes())
            .await
            .unwrap_or_else(|e| panic!("{store:?}: writing {name:?}: {e}"));
    }
}

async fn walk_names(store: &dyn Store, cx: &CallContext, prefix: &str, start: &str) -> Vec<String> {
    let mut names = Vec::new();
    store
        .walk_from(cx, prefix, start, &mut collect_into(&mut names, -1))
        .await
        .unwrap_or_else(|e| panic!("{store:?}: walking {prefix:?} from {start:?}: {e}"));
    names
}

pub async fn walk_from_resumes_at_starting_point(store: &dyn Store) {
    let cx = CallContext::new();
    write_names(store, &cx, &["00000001", "00000002", "00000003", "00000004"]).await;

    assert_eq!(
        walk_names(store, &cx, "", "00000002").await,
        ["00000002", "00000003", "00000004"],
        "{store:?}"
    );
}

pub async fn walk_from_single_character_start(store: &dyn Store) {
    let cx = CallContext::new();
    write_names(store, &cx, &["a", "b", "c", "d"]).await;

    assert_eq!(walk_names(store, &cx, "", "b").await, ["b", "c", "d"], "{store:?}");
    assert_eq!(walk_names(store, &cx, "", "bb").await, ["c", "d"], "{store:?}");
}

pub async fn walk_from_rejects_start_outside_prefix(store: &dyn Store) {
    let cx = CallContext::new();
    write_names(store, &cx, &["0000/0001", "0001/0002"]).await;

    let mut visited = 0;
    let res = store
        .walk_from(&cx, "0000", "0001/0002", &mut |_: &str| -> StoreResult<ControlFlow<()>> {
            visited += 1;
            Ok(ControlFlow::Continue(()))
        })
        .await;

    match res {
        Err(StoreError::InvalidUsage(msg)) => assert!(msg.contains("must start with prefix")),
        other => panic!("{store:?}: expected invalid usage, got {other:?}"),
    }
    assert_eq!(visited, 0);
}

pub async fn missing_object_is_not_found(store: &dyn Store) {
    let cx = CallContext::new();

    let err = store.open_object(&cx, "never/written").await.unwrap_err();
    assert!(err.is_not_found(), "{store:?}: open gave {err:?}");

    let err = store.object_attributes(&cx, "never/written").await.unwrap_err();
    assert!(err.is_not_found(), "{store:?}: attributes gave {err:?}");

    let err = store.delete_object(&cx, "never/written").await.unwrap_err();
    assert!(err.is_not_found(), "{store:?}: delete gave {err:?}");

    assert!(!store.file_exists(&cx, "never/written").await.unwrap());
}

pub async fn walk_prefix_selects_names(store: &dyn Store) {
    let cx = CallContext::new();
    write_names(
        store,
        &cx,
        &["0000/0001", "0000/0002", "0000a", "0000b", "0001/0000", "0001a"],
    )
    .await;

    assert_eq!(
        walk_names(store, &cx, "0000/", "").await,
        ["0000/0001", "0000/0002"],
        "{store:?}"
    );
    assert_eq!(
        walk_names(store, &cx, "0000", "").await,
        ["0000/0001", "0000/0002", "0000a", "0000b"],
        "{store:?}"
    );
    assert_eq!(
        walk_names(store, &cx, "0000", "0000/0002").await,
        ["0000/0002", "0000a", "0000b"],
        "{store:?}"
    );
    assert!(walk_names(store, &cx, "0002", "").await.is_empty(), "{store:?}");
}

pub async fn walk_stops_and_propagates(store: &dyn Store) {
    let cx = CallContext::new();
    write_names(store, &cx, &["a", "b", "c"]).await;

    let mut seen = Vec::new();
    store
        .walk(&cx, "", &mut |name: &str| -> StoreResult<ControlFlow<()>> {
            seen.push(name.to_string());
            Ok(if seen.len() == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        })
        .await
        .unwrap();
    assert_eq!(seen, ["a", "b"], "{store:?}");

    let err = store
        .walk(&cx, "", &mut |name: &str| -> StoreResult<ControlFlow<()>> {
            if name == "b" {
                Err(StoreError::invalid_usage("visitor failed"))
            } else {
                Ok(ControlFlow::Continue(()))
            }
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("visitor failed"), "{store:?}: {err}");
}

pub async fn list_files_honours_max(store: &dyn Store) {
    let cx = CallContext::new();
    write_names(store, &cx, &["x/1", "x/2", "x/3", "y/1"]).await;

    assert_eq!(store.list_files(&cx, "x/", 2).await.unwrap(), ["x/1", "x/2"]);
    assert!(store.list_files(&cx, "x/", 0).await.unwrap().is_empty());
    assert_eq!(store.list_files(&cx, "", -1).await.unwrap().len(), 4);
}

pub async fn copy_and_delete(store: &dyn Store) {
    let cx = CallContext::new();
    write_bytes(store, &cx, "src", b"payload").await.unwrap();

    store.copy_object(&cx, "src", "dst/copy").await.unwrap();
    assert_eq!(read_bytes(store, &cx, "dst/copy").await.unwrap(), b"payload");

    store.delete_object(&cx, "src").await.unwrap();
    assert!(!store.file_exists(&cx, "src").await.unwrap(), "{store:?}");
    assert!(store.file_exists(&cx, "dst/copy").await.unwrap(), "{store:?}");
}

pub async fn cancelled_context_fails_fast(store: &dyn Store) {
    let cx = CallContext::new();
    cx.cancel.cancel();

    let err = write_bytes(store, &cx, "a", b"x").await.unwrap_err();
    assert!(matches!(err, StoreError::Cancelled), "{store:?}: {err:?}");

    let live = CallContext::new();
    assert!(!store.file_exists(&live, "a").await.unwrap(), "{store:?}");
}

pub async fn walk_matches_sorted_filter(store: &dyn Store) {
    let cx = CallContext::new();
    let names = [
        "0001", "0002/x", "a/b", "a0", "b/c/d", "b0", "ba", "c", "c-1", "c./1", "zz",
    ];
    write_names(store, &cx, &names).await;

    for prefix in ["", "a", "b", "b/", "c", "0", "q"] {
        let mut expected: Vec<&str> = names.iter().copied().filter(|n| n.starts_with(prefix)).collect();
        expected.sort_unstable();
        assert_eq!(walk_names(store, &cx, prefix, "").await, expected, "{store:?}: prefix {prefix:?}");

        let mut starts: Vec<String> = expected.iter().map(|n| n.to_string()).collect();
        starts.push(format!("{prefix}~"));
        starts.push(format!("{prefix}0"));
        for start in starts {
            let resumed: Vec<&str> = expected.iter().copied().filter(|n| *n >= start.as_str()).collect();
            assert_eq!(
                walk_names(store, &cx, prefix, &start).await,
                resumed,
                "{store:?}: prefix {prefix:?} start {start:?}"
            );
        }
    }
}

/// Names whose stored keys sort differently once the extension is appended
/// (`a-b.gz` < `a.gz`) must still be visited in name order.
pub async fn walk_orders_names_with_extension(store: &dyn Store) {
    assert!(!store.config().extension().is_empty());
    let cx = CallContext::new();
    write_names(store, &cx, &["b", "a-b", "a", "a b", "a-b-c", "a.x"]).await;

    assert_eq!(
        walk_names(store, &cx, "", "").await,
        ["a", "a b", "a-b", "a-b-c", "a.x", "b"],
        "{store:?}"
    );
    assert_eq!(
        walk_names(store, &cx, "", "a-b").await,
        ["a-b", "a-b-c", "a.x", "b"],
        "{store:?}"
    );
    assert_eq!(walk_names(store, &cx, "a", "a").await, ["a", "a b", "a-b", "a-b-c", "a.x"]);
}

/// Write `names` into an empty store, then check that walking `prefix` from
/// `start` yields exactly the sorted names that qualify.
pub async fn walk_agrees_with_filter(store: &dyn Store, names: &[String], prefix: &str, start: &str) {
    let cx = CallContext::new();
    for name in names {
        write_bytes(store, &cx, name, b"")
            .await
            .unwrap_or_else(|e| panic!("{store:?}: writing {name:?}: {e}"));
    }

    let mut expected: Vec<&str> = names
        .iter()
        .map(String::as_str)
        .filter(|name| name.starts_with(prefix) && *name >= start)
        .collect();
    expected.sort_unstable();
    expected.dedup();

    assert_eq!(
        walk_names(store, &cx, prefix, start).await,
        expected,
        "{store:?}: prefix {prefix:?} start {start:?}"
    );
}

pub async fn overwrite_off_keeps_first(store: &dyn Store) {
    assert!(!store.config().overwrite());
    let cx = CallContext::new();

    write_bytes(store, &cx, "a", b"first").await.unwrap();
    write_bytes(store, &cx, "a", b"second").await.unwrap();

    assert_eq!(read_bytes(store, &cx, "a").await.unwrap(), b"first", "{store:?}");
}

pub async fn overwrite_on_replaces(store: &dyn Store) {
    assert!(store.config().overwrite());
    let cx = CallContext::new();

    write_bytes(store, &cx, "a", b"first").await.unwrap();
    write_bytes(store, &cx, "a", b"second").await.unwrap();

    assert_eq!(read_bytes(store, &cx, "a").await.unwrap(), b"second", "{store:?}");
}

pub async fn codec_preserves_bytes(store: &dyn Store) {
    let cx = CallContext::new();
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i * 31 % 251) as u8).collect();

    write_bytes(store, &cx, "blob/large", &payload).await.unwrap();
    write_bytes(store, &cx, "blob/empty", b"").await.unwrap();

    assert_eq!(read_bytes(store, &cx, "blob/large").await.unwrap(), payload, "{store:?}");
    assert!(read_bytes(store, &cx, "blob/empty").await.unwrap().is_empty());
    assert_eq!(
        store.list_files(&cx, "blob/", -1).await.unwrap(),
        ["blob/empty", "blob/large"],
        "{store:?}"
    );

    let attrs = store.object_attributes(&cx, "blob/large").await.unwrap();
    assert!(attrs.size > 0);
}

// tests/concurrent_dedup.rs

//! Many concurrent requests for one name (or its byproducts) observe a
//! single pipeline execution and the same resulting instance.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::test_dirs;
use pipewright::{Artifact, BuildInstance, BuildStatus};

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_requests_share_one_execution() {
    let dirs = test_dirs();
    dirs.write_input("data.txt", "payload");

    let ctx = dirs.context();
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_in_processor = runs.clone();

    ctx.build("*.bin", 0, &[])
        .using(
            move |_instance: &mut BuildInstance,
                  inputs: Vec<Artifact>|
                  -> anyhow::Result<Vec<Artifact>> {
                runs_in_processor.fetch_add(1, Ordering::SeqCst);
                // Hold the build open long enough for every caller to join.
                std::thread::sleep(Duration::from_millis(100));
                Ok(inputs)
            },
        )
        .from(&["$1.txt"])
        .unwrap();

    let requests: Vec<_> = (0..16).map(|_| ctx.start("data.bin")).collect();
    let outcomes = futures::future::join_all(requests).await;

    let first = outcomes[0].as_ref().unwrap();
    assert_eq!(first.status(), BuildStatus::Succeeded);
    for outcome in &outcomes {
        let instance = outcome.as_ref().unwrap();
        assert!(Arc::ptr_eq(instance, first));
        assert_eq!(instance.output_path(), first.output_path());
    }

    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn byproduct_requests_join_the_primary_build() {
    let dirs = test_dirs();
    dirs.write_input("pack.src", "contents");

    let ctx = dirs.context();
    ctx.build("*.pak", 0, &["$1.idx"])
        .using(
            |_instance: &mut BuildInstance,
             inputs: Vec<Artifact>|
             -> anyhow::Result<Vec<Artifact>> {
                std::thread::sleep(Duration::from_millis(100));
                let bytes = inputs[0].read()?;
                Ok(vec![
                    Artifact::from_bytes(bytes.clone()),
                    Artifact::from_bytes(format!("index of {} bytes", bytes.len())),
                ])
            },
        )
        .from(&["$1.src"])
        .unwrap();

    let primary = ctx.start("pack.pak");
    let alias = ctx.start("pack.idx");

    let (primary, alias) = tokio::join!(primary, alias);
    let primary = primary.unwrap();
    let alias = alias.unwrap();

    assert!(Arc::ptr_eq(&primary, &alias));
    assert_eq!(primary.status(), BuildStatus::Succeeded);
    assert!(dirs.output_exists("pack.pak"));
    assert!(dirs.output_exists("pack.idx"));

    ctx.wait_all().await;
    let built = ctx.finish().unwrap();
    assert_eq!(built, vec!["pack.idx".to_string(), "pack.pak".to_string()]);
}

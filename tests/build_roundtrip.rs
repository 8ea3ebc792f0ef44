// tests/build_roundtrip.rs

//! Building twice with nothing changed runs the pipeline once and skips
//! the second time; the detection bits decide what "changed" means.

mod common;

use common::{test_dirs, uppercase};
use pipewright::{BuildStatus, ChangeDetection, ContextOptions};

#[tokio::test(flavor = "multi_thread")]
async fn build_then_skip_roundtrip() {
    let dirs = test_dirs();
    dirs.write_input("data.txt", "payload");

    {
        let ctx = dirs.context();
        ctx.build("*.bin", 0, &[])
            .using(uppercase)
            .from(&["$1.txt"])
            .unwrap();

        let instance = ctx.start("data.bin").await.unwrap();
        assert_eq!(instance.status(), BuildStatus::Succeeded);
        ctx.wait_all().await;

        assert_eq!(ctx.finish().unwrap(), vec!["data.bin".to_string()]);
        assert_eq!(dirs.read_output("data.bin"), "PAYLOAD");
    }

    // Second run: same inputs, same pipeline shape, same rules.
    {
        let ctx = dirs.context();
        ctx.build("*.bin", 0, &[])
            .using(uppercase)
            .from(&["$1.txt"])
            .unwrap();

        let instance = ctx.start("data.bin").await.unwrap();
        assert_eq!(instance.status(), BuildStatus::Skipped);
        ctx.wait_all().await;

        // Skipped builds are not "built" for notification purposes.
        assert!(ctx.finish().unwrap().is_empty());
        assert_eq!(ctx.all_assets(), vec!["data.bin".to_string()]);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn changed_input_triggers_rebuild() {
    let dirs = test_dirs();
    dirs.write_input("data.txt", "one");

    {
        let ctx = dirs.context();
        ctx.build("*.bin", 0, &[])
            .using(uppercase)
            .from(&["$1.txt"])
            .unwrap();
        assert_eq!(
            ctx.start("data.bin").await.unwrap().status(),
            BuildStatus::Succeeded
        );
        ctx.wait_all().await;
        ctx.finish().unwrap();
    }

    dirs.write_input("data.txt", "two");

    {
        let ctx = dirs.context();
        ctx.build("*.bin", 0, &[])
            .using(uppercase)
            .from(&["$1.txt"])
            .unwrap();
        assert_eq!(
            ctx.start("data.bin").await.unwrap().status(),
            BuildStatus::Succeeded
        );
        assert_eq!(dirs.read_output("data.bin"), "TWO");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn content_hash_detection_ignores_timestamp_touches() {
    let dirs = test_dirs();
    dirs.write_input("data.txt", "stable");

    let hash_only = |dirs: &common::TestDirs| {
        let mut env = dirs.env();
        env.input_change_detection = ChangeDetection::CONTENT_HASH;
        env.output_change_detection = ChangeDetection::NONE;
        dirs.context_from_env(env, ContextOptions::default())
    };

    {
        let ctx = hash_only(&dirs);
        ctx.build("*.bin", 0, &[])
            .using(uppercase)
            .from(&["$1.txt"])
            .unwrap();
        assert_eq!(
            ctx.start("data.bin").await.unwrap().status(),
            BuildStatus::Succeeded
        );
        ctx.wait_all().await;
        ctx.finish().unwrap();
    }

    // Touch: identical bytes, new modification time.
    dirs.write_input("data.txt", "stable");
    {
        let ctx = hash_only(&dirs);
        ctx.build("*.bin", 0, &[])
            .using(uppercase)
            .from(&["$1.txt"])
            .unwrap();
        assert_eq!(
            ctx.start("data.bin").await.unwrap().status(),
            BuildStatus::Skipped
        );
        ctx.wait_all().await;
        ctx.finish().unwrap();
    }

    // Same length, one byte different.
    dirs.write_input("data.txt", "stablE");
    {
        let ctx = hash_only(&dirs);
        ctx.build("*.bin", 0, &[])
            .using(uppercase)
            .from(&["$1.txt"])
            .unwrap();
        assert_eq!(
            ctx.start("data.bin").await.unwrap().status(),
            BuildStatus::Succeeded
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn full_rebuild_bypasses_history() {
    let dirs = test_dirs();
    dirs.write_input("data.txt", "payload");

    for _ in 0..2 {
        let ctx = dirs.context_with(ContextOptions { full_rebuild: true });
        ctx.build("*.bin", 0, &[])
            .using(uppercase)
            .from(&["$1.txt"])
            .unwrap();
        assert_eq!(
            ctx.start("data.bin").await.unwrap().status(),
            BuildStatus::Succeeded
        );
        ctx.wait_all().await;
        ctx.finish().unwrap();
    }
}

// tests/rule_selection.rs

//! Rule matching end to end: priority groups, deterministic ambiguity
//! resolution, wildcard capture substitution and missing rules.

mod common;

use common::test_dirs;
use pipewright::{Artifact, BuildError, BuildInstance, BuildStatus, ContextOptions};

fn write_constant(
    text: &'static str,
) -> impl Fn(&mut BuildInstance, Vec<Artifact>) -> anyhow::Result<Vec<Artifact>> {
    move |_instance, _inputs| Ok(vec![Artifact::from_bytes(text.as_bytes().to_vec())])
}

#[tokio::test(flavor = "multi_thread")]
async fn lowest_priority_value_wins() {
    let dirs = test_dirs();
    dirs.write_input("x.src", "seed");

    let ctx = dirs.context();
    ctx.build("*.asset", 5, &[])
        .using(write_constant("from priority five"))
        .from(&["$1.src"])
        .unwrap();
    ctx.build("*.asset", 0, &[])
        .using(write_constant("from priority zero"))
        .from(&["$1.src"])
        .unwrap();

    let instance = ctx.start("x.asset").await.unwrap();
    assert_eq!(instance.status(), BuildStatus::Succeeded);
    assert_eq!(dirs.read_output("x.asset"), "from priority zero");
}

#[tokio::test(flavor = "multi_thread")]
async fn equal_priority_ambiguity_picks_first_registered_every_run() {
    let dirs = test_dirs();
    dirs.write_input("x.src", "seed");

    // full_rebuild so both runs actually execute the pipeline.
    for _ in 0..2 {
        let ctx = dirs.context_with(ContextOptions { full_rebuild: true });
        ctx.build("*.asset", 0, &[])
            .using(write_constant("first registered"))
            .from(&["$1.src"])
            .unwrap();
        ctx.build("x.*", 0, &[])
            .using(write_constant("second registered"))
            .from(&["$1.src"])
            .unwrap();

        let instance = ctx.start("x.asset").await.unwrap();
        assert_eq!(instance.status(), BuildStatus::Succeeded);
        assert_eq!(dirs.read_output("x.asset"), "first registered");
        ctx.wait_all().await;
        ctx.finish().unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn wildcard_captures_substitute_into_inputs_and_byproducts() {
    let dirs = test_dirs();
    dirs.write_input("foo.src", "body");

    let ctx = dirs.context();
    ctx.build("*.asset", 0, &["$1.meta"])
        .using(
            |_instance: &mut BuildInstance,
             inputs: Vec<Artifact>|
             -> anyhow::Result<Vec<Artifact>> {
                let bytes = inputs[0].read()?;
                let meta = format!("{} bytes", bytes.len());
                Ok(vec![Artifact::from_bytes(bytes), Artifact::from_bytes(meta)])
            },
        )
        .from(&["$1.src"])
        .unwrap();

    let instance = ctx.start("foo.asset").await.unwrap();
    assert_eq!(instance.status(), BuildStatus::Succeeded);
    assert_eq!(instance.byproduct_names(), ["foo.meta"]);
    assert_eq!(dirs.read_output("foo.asset"), "body");
    assert_eq!(dirs.read_output("foo.meta"), "4 bytes");

    ctx.wait_all().await;
    let built = ctx.finish().unwrap();
    assert_eq!(
        built,
        vec!["foo.asset".to_string(), "foo.meta".to_string()]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_rule_is_an_error() {
    let dirs = test_dirs();

    let ctx = dirs.context();
    ctx.build("*.asset", 0, &[]).from(&["$1.src"]).unwrap();

    let outcome = ctx.start("nothing.matches-this").await;
    match outcome {
        Err(err) => assert!(matches!(*err, BuildError::NoMatchingRule(_))),
        Ok(instance) => panic!("expected NoMatchingRule, got {:?}", instance.status()),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn arity_mismatch_at_the_sink_fails_the_build() {
    let dirs = test_dirs();
    dirs.write_input("x.src", "seed");

    let ctx = dirs.context();
    // One input artifact but a declared byproduct: the sink expects two.
    ctx.build("*.asset", 0, &["$1.meta"])
        .from(&["$1.src"])
        .unwrap();

    let instance = ctx.start("x.asset").await.unwrap();
    assert_eq!(instance.status(), BuildStatus::Failed);
    assert!(matches!(
        instance.failure().map(|e| &**e),
        Some(BuildError::ArityMismatch { .. })
    ));
}

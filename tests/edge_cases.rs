use chrono::Duration;
use flagpole::{
    CompileError, ComparisonOp, Context, EngineSettings, EvalError, Evaluator, RuleSet,
    RuleSetBuilder, Value, property, runtime,
};

fn evaluators(ruleset: &RuleSet) -> Vec<Box<dyn Evaluator>> {
    let settings = EngineSettings::default();
    vec![
        Box::new(settings.interpret(ruleset).unwrap()),
        Box::new(settings.compile(ruleset).unwrap()),
    ]
}

fn single(matcher: flagpole::Matcher) -> RuleSet {
    RuleSetBuilder::new()
        .rule(|r| r.when(matcher).value("hit"))
        .default_value("miss")
        .build()
        .unwrap()
}

fn outcome(ruleset: &RuleSet, ctx: &Context) -> Vec<Result<Option<Value>, EvalError>> {
    evaluators(ruleset).iter().map(|e| e.evaluate(ctx)).collect()
}

fn hit() -> Result<Option<Value>, EvalError> {
    Ok(Some(Value::from("hit")))
}

fn miss() -> Result<Option<Value>, EvalError> {
    Ok(Some(Value::from("miss")))
}

// --- Ordering direction ---------------------------------------------------

#[test]
fn ordering_reads_subject_against_threshold() {
    let adult = single(property("age").gt(18_i64));
    assert_eq!(outcome(&adult, &Context::new().set("age", 20_i64)), vec![hit(), hit()]);
    assert_eq!(outcome(&adult, &Context::new().set("age", 16_i64)), vec![miss(), miss()]);

    let child = single(property("age").lt(18_i64));
    assert_eq!(outcome(&child, &Context::new().set("age", 16_i64)), vec![hit(), hit()]);
    assert_eq!(outcome(&child, &Context::new().set("age", 20_i64)), vec![miss(), miss()]);
}

#[test]
fn greater_than_is_strict() {
    let ctx = Context::new().set("age", 18_i64);
    assert_eq!(outcome(&single(property("age").gt(18_i64)), &ctx), vec![miss(), miss()]);
    assert_eq!(outcome(&single(property("age").gte(18_i64)), &ctx), vec![hit(), hit()]);
    assert_eq!(outcome(&single(property("age").lte(18_i64)), &ctx), vec![hit(), hit()]);
    assert_eq!(outcome(&single(property("age").lt(18_i64)), &ctx), vec![miss(), miss()]);
}

#[test]
fn decimal_scale_does_not_affect_equality() {
    let ruleset = single(property("price").eq(Value::Number("1.50".parse().unwrap())));
    let ctx = Context::new().set("price", Value::Number("1.5".parse().unwrap()));
    assert_eq!(outcome(&ruleset, &ctx), vec![hit(), hit()]);
}

// --- Null semantics ---------------------------------------------------------

#[test]
fn null_semantics() {
    let registry = flagpole::ComparerRegistry::new();
    let compare = |threshold: &Value, subject: Option<&Value>, op| {
        runtime::compare(threshold, subject, op, None, &registry).unwrap()
    };

    assert!(compare(&Value::Null, None, ComparisonOp::Equal));
    assert!(compare(&Value::Null, Some(&Value::Null), ComparisonOp::Equal));
    assert!(!compare(&Value::Null, None, ComparisonOp::NotEqual));
    for op in [
        ComparisonOp::Equal,
        ComparisonOp::NotEqual,
        ComparisonOp::LessThan,
        ComparisonOp::LessEqual,
        ComparisonOp::GreaterThan,
        ComparisonOp::GreaterEqual,
    ] {
        assert!(!compare(&Value::Null, Some(&Value::from(1_i64)), op), "{op}");
        assert!(!compare(&Value::from(1_i64), None, op), "{op}");
    }
}

#[test]
fn missing_property_never_satisfies_not_equal() {
    let ruleset = single(property("plan").neq("free"));
    assert_eq!(outcome(&ruleset, &Context::new()), vec![miss(), miss()]);
    assert_eq!(
        outcome(&ruleset, &Context::new().set("plan", "pro")),
        vec![hit(), hit()]
    );
}

#[test]
fn null_literal_matches_missing_property() {
    let ruleset = single(property("referrer").eq(Value::Null));
    assert_eq!(outcome(&ruleset, &Context::new()), vec![hit(), hit()]);
    assert_eq!(
        outcome(&ruleset, &Context::new().set("referrer", "ads")),
        vec![miss(), miss()]
    );
}

// --- Errors -----------------------------------------------------------------

#[test]
fn type_mismatch_fails_the_call_only() {
    let ruleset = single(property("age").gte(18_i64));
    for evaluator in evaluators(&ruleset) {
        let bad = Context::new().set("age", "eighteen");
        assert_eq!(
            evaluator.evaluate(&bad),
            Err(EvalError::TypeMismatch {
                threshold: "number",
                subject: "string",
            })
        );
        // evaluator is still usable
        let good = Context::new().set("age", 30_i64);
        assert_eq!(evaluator.evaluate(&good), hit());
    }
}

#[test]
fn number_and_float_do_not_mix() {
    let ruleset = single(property("score").gt(0.5_f64));
    let err = outcome(&ruleset, &Context::new().set("score", 1_i64));
    assert!(err.iter().all(|r| matches!(r, Err(EvalError::TypeMismatch { .. }))));
}

#[test]
fn unknown_comparer_fails_only_when_taken() {
    let ruleset = RuleSetBuilder::new()
        .rule(|r| r.when(property("beta").eq(true)).value("beta"))
        .rule(|r| r.when(property("app.version").using("calver").gte("2024.01")).value("new"))
        .default_value("old")
        .build()
        .unwrap();
    // building succeeds
    for evaluator in evaluators(&ruleset) {
        let short_circuit = Context::new().set("beta", true).set("app.version", "2024.03");
        assert_eq!(evaluator.evaluate(&short_circuit), Ok(Some(Value::from("beta"))));

        let taken = Context::new().set("app.version", "2024.03");
        assert_eq!(
            evaluator.evaluate(&taken),
            Err(EvalError::UnknownComparer {
                name: "calver".to_owned(),
            })
        );
    }
}

#[test]
fn comparer_rejects_malformed_input() {
    let ruleset = single(property("app.version").using("version").gte("2.0"));
    let ctx = Context::new().set("app.version", "latest");
    for result in outcome(&ruleset, &ctx) {
        assert_eq!(
            result,
            Err(EvalError::ComparerRejected {
                name: "version".to_owned(),
                input: "latest".to_owned(),
            })
        );
    }
}

#[test]
fn missing_system_time() {
    let ruleset = single(property("seen").within(Duration::hours(1)));

    let no_clock = Context::new().set("seen", "2024-05-01T12:00:00Z");
    for result in outcome(&ruleset, &no_clock) {
        assert!(matches!(result, Err(EvalError::MissingSystemTime { .. })));
    }

    let bad_clock = no_clock.clone().now("soon");
    for result in outcome(&ruleset, &bad_clock) {
        assert!(matches!(result, Err(EvalError::MissingSystemTime { .. })));
    }

    // an unparsable subject is a plain miss
    let bad_subject = Context::new().set("seen", "yesterday");
    assert_eq!(outcome(&ruleset, &bad_subject), vec![miss(), miss()]);
}

#[test]
fn time_window_bound_is_exclusive() {
    let ruleset = single(property("seen").within(Duration::hours(1)));
    let edge = Context::new()
        .set("seen", "2024-05-01T11:00:00Z")
        .now("2024-05-01T12:00:00Z");
    assert_eq!(outcome(&ruleset, &edge), vec![miss(), miss()]);

    let future = Context::new()
        .set("seen", "2024-05-01T12:30:00Z")
        .now("2024-05-01T12:00:00Z");
    assert_eq!(outcome(&ruleset, &future), vec![hit(), hit()]);
}

#[test]
fn time_window_reads_clock_even_without_subject() {
    let ruleset = single(property("seen").within(Duration::hours(1)));
    let contexts = [
        Context::new(),
        Context::new().set("seen", "yesterday"),
        Context::new().set("seen", "yesterday").now("2024-05-01T12:00:00Z"),
    ];
    for ctx in &contexts {
        for evaluator in evaluators(&ruleset) {
            let keys = std::cell::RefCell::new(Vec::new());
            let recording = |key: &str| {
                keys.borrow_mut().push(key.to_owned());
                ctx.get(key).cloned()
            };
            assert_eq!(evaluator.evaluate(&recording), miss());
            assert_eq!(keys.into_inner(), vec!["seen", "system.time_utc"]);
        }
    }
}

// --- Containment ------------------------------------------------------------

#[test]
fn contains_is_polymorphic() {
    let tags = Context::new().set("tags", vec!["beta", "staff", "eu"]);

    let scalar_in_array = single(property("tags").contains("staff"));
    assert_eq!(outcome(&scalar_in_array, &tags), vec![hit(), hit()]);

    let subset = single(property("tags").contains(vec!["eu", "beta"]));
    assert_eq!(outcome(&subset, &tags), vec![hit(), hit()]);

    let not_subset = single(property("tags").contains(vec!["eu", "admin"]));
    assert_eq!(outcome(&not_subset, &tags), vec![miss(), miss()]);

    let unwrap_single = single(property("plan").contains(vec!["pro"]));
    assert_eq!(
        outcome(&unwrap_single, &Context::new().set("plan", "pro")),
        vec![hit(), hit()]
    );
}

// --- Shape ------------------------------------------------------------------

#[test]
fn empty_ruleset_returns_default_or_none() {
    let with_default = RuleSetBuilder::new().default_value("only").build().unwrap();
    assert_eq!(
        outcome(&with_default, &Context::new()),
        vec![Ok(Some(Value::from("only"))), Ok(Some(Value::from("only")))]
    );

    let bare = RuleSetBuilder::new().build().unwrap();
    assert_eq!(outcome(&bare, &Context::new()), vec![Ok(None), Ok(None)]);
}

#[test]
fn rule_without_value_is_rejected() {
    let err = RuleSetBuilder::new()
        .rule(|r| r.value("ok"))
        .rule(|r| r.when(property("x").eq(1_i64)))
        .build()
        .unwrap_err();
    assert_eq!(err, CompileError::MissingValue { index: 1 });
}

#[test]
fn duplicate_partition_keys_are_rejected() {
    let err = RuleSetBuilder::new()
        .partition("country", |p| p.branch_value("IL", "a").branch_value("il", "b"))
        .build()
        .unwrap_err();
    assert_eq!(
        err,
        CompileError::DuplicatePartitionKey {
            property: "country".to_owned(),
            key: "il".to_owned(),
        }
    );
}

#[test]
fn empty_owner_type_is_rejected() {
    let err = RuleSetBuilder::new()
        .rule(|r| r.uniform("", "salt", ["a"]))
        .build()
        .unwrap_err();
    assert_eq!(err, CompileError::EmptyOwnerType { index: 0 });
}

#[test]
fn shared_literals_are_pooled_once() {
    let ruleset = RuleSetBuilder::new()
        .partition("country", |p| {
            p.branch("us", |b| b.rule(|r| r.when(property("tier").eq("gold")).value("on")))
                .branch("ca", |b| b.rule(|r| r.when(property("tier").eq("gold")).value("on")))
                .fallback(|b| b.rule(|r| r.value("off")))
        })
        .default_value("off")
        .build()
        .unwrap();
    let stats = EngineSettings::default().compile(&ruleset).unwrap().pool_stats();
    // gold, on, off
    assert_eq!(stats.literals, 3);
}

#[test]
fn deep_matcher_nesting() {
    let mut matcher = property("x").eq(1_i64);
    for _ in 0..64 {
        matcher = !!matcher;
    }
    let ruleset = single(matcher);
    assert_eq!(outcome(&ruleset, &Context::new().set("x", 1_i64)), vec![hit(), hit()]);
}

#[test]
fn returned_literal_keeps_its_scale() {
    let ruleset = RuleSetBuilder::new()
        .rule(|r| r.when(property("x").eq(Value::Number("1.0".parse().unwrap()))).value("a"))
        .rule(|r| r.value(Value::Number("1.00".parse().unwrap())))
        .build()
        .unwrap();
    let results = outcome(&ruleset, &Context::new());
    assert_eq!(results[0], results[1]);
    for result in results {
        assert_eq!(result.unwrap().unwrap().to_string(), "1.00");
    }
}

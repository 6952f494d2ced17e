use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use override_engine::matcher::CompiledMatcher;
use override_engine::rule::{Action, ResponseContent, SyntheticAction};
use override_engine::{InterceptedRequest, Rule, RuleMatcher, RuleSet, UrlPattern};
use serde_json::json;

fn create_test_rule(id: usize, url: UrlPattern) -> Rule {
    Rule {
        id: format!("rule-{id}"),
        name: format!("Rule {id}"),
        enabled: true,
        matcher: RuleMatcher {
            url: Some(url),
            method: Some("GET".to_string()),
        },
        action: Action::Replace(SyntheticAction::new(ResponseContent::Json(json!({"id": id})))),
    }
}

fn compile_rules(count: usize) -> RuleSet {
    let rules = (0..count)
        .map(|i| create_test_rule(i, UrlPattern::prefix(format!("/api/v1/endpoint{i}/"))))
        .collect();
    RuleSet::compile(rules, true).0
}

fn compile_rules_with_regex(count: usize) -> RuleSet {
    let rules = (0..count)
        .map(|i| {
            create_test_rule(
                i,
                UrlPattern::regex(format!(r"^/api/v\d+/endpoint{i}$"), Some("i")),
            )
        })
        .collect();
    RuleSet::compile(rules, true).0
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");

    for rule_count in [10, 50, 100, 500, 1000].iter() {
        let rules = compile_rules(*rule_count);
        group.throughput(Throughput::Elements(1));

        // First rule (best case)
        let first = InterceptedRequest::new("/api/v1/endpoint0/items", Some("GET"));
        group.bench_with_input(
            BenchmarkId::new("match_first", rule_count),
            rule_count,
            |b, _| b.iter(|| rules.resolve(black_box(&first)).is_some()),
        );

        let last = InterceptedRequest::new(
            format!("/api/v1/endpoint{}/items", rule_count - 1),
            Some("GET"),
        );
        group.bench_with_input(
            BenchmarkId::new("match_last", rule_count),
            rule_count,
            |b, _| b.iter(|| rules.resolve(black_box(&last)).is_some()),
        );

        // No match scans every rule
        let none = InterceptedRequest::new("/not/found", Some("GET"));
        group.bench_with_input(
            BenchmarkId::new("match_none", rule_count),
            rule_count,
            |b, _| b.iter(|| rules.resolve(black_box(&none)).is_some()),
        );
    }

    group.finish();
}

fn bench_regex_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("regex_resolve");

    for rule_count in [10, 50, 100].iter() {
        let rules = compile_rules_with_regex(*rule_count);
        let request = InterceptedRequest::new(
            format!("/API/V2/endpoint{}", rule_count / 2),
            Some("GET"),
        );

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("regex_match", rule_count),
            rule_count,
            |b, _| b.iter(|| rules.resolve(black_box(&request)).is_some()),
        );
    }

    group.finish();
}

fn bench_matcher_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("matcher_compile");

    let regex = RuleMatcher {
        url: Some(UrlPattern::regex(r"^https://api\.example\.com/users/\d+$", Some("is"))),
        method: None,
    };
    let prefix = RuleMatcher {
        url: Some(UrlPattern::prefix("https://api.example.com/")),
        method: Some("POST".to_string()),
    };

    group.bench_function("regex", |b| {
        b.iter(|| CompiledMatcher::compile(black_box(&regex)).is_ok())
    });
    group.bench_function("prefix", |b| {
        b.iter(|| CompiledMatcher::compile(black_box(&prefix)).is_ok())
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_resolve,
    bench_regex_resolve,
    bench_matcher_compile
);
criterion_main!(benches);

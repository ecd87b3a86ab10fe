//! Behaviour tests for command registration and contract validation.

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use warden_protocol::{
    CommandRegistry, CommandSpec, ContractViolation, RegistryError, ResolvedCommand, Rule,
    ValueType, validate,
};

#[derive(Default)]
struct TestWorld {
    specs: Vec<CommandSpec>,
    validation: Option<Result<(), ContractViolation>>,
    registry: Option<Result<CommandRegistry, RegistryError>>,
}

#[fixture]
fn world() -> TestWorld {
    TestWorld::default()
}

fn value_type(word: &str) -> ValueType {
    match word {
        "text" => ValueType::of::<String>(),
        "number" => ValueType::of::<u64>(),
        "empty" | "no" => ValueType::Nothing,
        other => panic!("unsupported value type '{other}'"),
    }
}

fn latest_spec(world: &TestWorld) -> &CommandSpec {
    world.specs.last().expect("a command was declared")
}

#[given("a command {name} taking text and replying with text")]
fn given_text_command(world: &mut TestWorld, name: String) {
    let spec = CommandSpec::new(name.trim_matches('"').to_owned(), Rule::ALLOW)
        .with_request::<String>()
        .with_response::<String>();
    world.specs.push(spec);
}

#[given("a fire-and-forget command {name} taking text")]
fn given_fire_and_forget(world: &mut TestWorld, name: String) {
    let spec = CommandSpec::new(name.trim_matches('"').to_owned(), Rule::ALLOW)
        .with_request::<String>()
        .without_reply();
    world.specs.push(spec);
}

#[when("the caller validates a {request} request expecting a {response} reply")]
fn when_validating(world: &mut TestWorld, request: String, response: String) {
    let outcome = validate(
        latest_spec(world),
        value_type(&request),
        value_type(&response),
    );
    world.validation = Some(outcome);
}

#[when("the registry is built")]
fn when_registry_built(world: &mut TestWorld) {
    world.registry = Some(CommandRegistry::new(world.specs.clone()));
}

#[then("validation succeeds")]
fn then_validation_succeeds(world: &mut TestWorld) {
    let outcome = world.validation.as_ref().expect("validation ran");
    assert!(outcome.is_ok(), "expected success, got {outcome:?}");
}

#[then("validation fails on the request")]
fn then_request_fails(world: &mut TestWorld) {
    let outcome = world.validation.as_ref().expect("validation ran");
    assert!(matches!(outcome, Err(ContractViolation::Request { .. })));
}

#[then("validation fails on the response")]
fn then_response_fails(world: &mut TestWorld) {
    let outcome = world.validation.as_ref().expect("validation ran");
    assert!(matches!(outcome, Err(ContractViolation::Response { .. })));
}

#[then("registration fails with a built-in collision")]
fn then_collision(world: &mut TestWorld) {
    let outcome = world.registry.as_ref().expect("registry built");
    assert!(matches!(outcome, Err(RegistryError::BuiltInCollision { .. })));
}

#[then("looking up {name} yields a built-in")]
fn then_built_in(world: &mut TestWorld, name: String) {
    let registry = world
        .registry
        .as_ref()
        .expect("registry built")
        .as_ref()
        .expect("registry is valid");
    assert!(matches!(
        registry.lookup(name.trim_matches('"')),
        Some(ResolvedCommand::BuiltIn(_))
    ));
}

#[scenario(
    path = "tests/features/command_contracts.feature",
    name = "Matching types are accepted"
)]
fn matching_types(world: TestWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/command_contracts.feature",
    name = "A mismatched request type is rejected"
)]
fn mismatched_request(world: TestWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/command_contracts.feature",
    name = "A fire-and-forget command only accepts an empty reply"
)]
fn fire_and_forget(world: TestWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/command_contracts.feature",
    name = "Custom commands cannot shadow built-ins"
)]
fn built_in_collision(world: TestWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/command_contracts.feature",
    name = "Built-ins are resolved without registration"
)]
fn built_in_lookup(world: TestWorld) {
    let _ = world;
}

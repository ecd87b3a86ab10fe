//! Unit tests for the command registry.

use rstest::{fixture, rstest};

use super::*;

#[fixture]
fn say_hello() -> CommandSpec {
    CommandSpec::new("say-hello", Rule::ALLOW)
        .with_request::<String>()
        .with_response::<String>()
}

#[rstest]
fn built_ins_are_always_present() {
    let registry = CommandRegistry::new(Vec::new()).expect("empty registry");

    assert_eq!(
        registry.lookup(GET_VERSION),
        Some(ResolvedCommand::BuiltIn(BuiltInCommand::GetVersion))
    );
    assert_eq!(
        registry.lookup(UNINSTALL_HELPER_TOOL),
        Some(ResolvedCommand::BuiltIn(BuiltInCommand::UninstallHelperTool))
    );
    assert!(registry.is_empty());
}

#[rstest]
fn custom_commands_resolve(say_hello: CommandSpec) {
    let registry = CommandRegistry::new(vec![say_hello.clone()]).expect("registry");

    let resolved = registry.lookup("say-hello").expect("command resolves");

    assert_eq!(resolved, ResolvedCommand::Custom(&say_hello));
    assert!(registry.contains(&say_hello));
    assert!(registry.lookup("say-goodbye").is_none());
}

#[rstest]
#[case(GET_VERSION)]
#[case(UNINSTALL_HELPER_TOOL)]
fn built_in_names_are_reserved(#[case] name: &'static str) {
    let error = CommandRegistry::new(vec![CommandSpec::new(name, Rule::DENY)])
        .expect_err("collision rejected");

    assert_eq!(
        error,
        RegistryError::BuiltInCollision {
            name: name.to_owned()
        }
    );
}

#[rstest]
fn duplicate_names_are_rejected(say_hello: CommandSpec) {
    let error = CommandRegistry::new(vec![say_hello.clone(), say_hello])
        .expect_err("duplicate rejected");

    assert!(error.to_string().contains("already registered"));
}

#[rstest]
fn blank_names_are_rejected() {
    let error = CommandRegistry::new(vec![CommandSpec::new("  ", Rule::ALLOW)])
        .expect_err("blank name rejected");
    assert_eq!(error, RegistryError::InvalidName);
}

#[rstest]
fn iteration_lists_built_ins_first(say_hello: CommandSpec) {
    let registry = CommandRegistry::new(vec![say_hello]).expect("registry");

    let names: Vec<&str> = registry.iter().map(CommandSpec::name).collect();

    assert_eq!(names, [GET_VERSION, UNINSTALL_HELPER_TOOL, "say-hello"]);
}

#[rstest]
fn rights_mirror_commands(say_hello: CommandSpec) {
    let registry = CommandRegistry::new(vec![say_hello.with_prompt("Say hello?")])
        .expect("registry");

    let rights: Vec<RightDefinition> = registry.rights().collect();

    assert_eq!(rights.len(), 3);
    let custom = rights.last().expect("custom right");
    assert_eq!(custom.name(), "say-hello");
    assert_eq!(custom.rule(), &Rule::ALLOW);
    assert_eq!(custom.prompt(), Some("Say hello?"));
}

#[rstest]
fn matching_types_validate(say_hello: CommandSpec) {
    assert!(validate_types::<String, String>(&say_hello).is_ok());
}

#[rstest]
fn mismatched_request_is_reported(say_hello: CommandSpec) {
    let violation = validate_types::<u32, String>(&say_hello).expect_err("request mismatch");

    assert!(matches!(violation, ContractViolation::Request { .. }));
}

#[rstest]
fn mismatched_response_is_reported(say_hello: CommandSpec) {
    let violation = validate_types::<String, ()>(&say_hello).expect_err("response mismatch");

    assert!(matches!(violation, ContractViolation::Response { .. }));
}

#[rstest]
#[case::nothing_back(ValueType::Nothing, true)]
#[case::typed_back(ValueType::of::<String>(), false)]
fn no_wait_only_accepts_nothing(#[case] response: ValueType, #[case] accepted: bool) {
    let spec = CommandSpec::new("fire", Rule::ALLOW)
        .with_request::<String>()
        .without_reply();

    let outcome = validate(&spec, ValueType::of::<String>(), response);

    assert_eq!(outcome.is_ok(), accepted);
}

#[rstest]
fn built_in_contracts_are_fixed() {
    assert!(validate_types::<(), String>(BuiltInCommand::GetVersion.spec()).is_ok());
    assert!(validate_types::<(), ()>(BuiltInCommand::UninstallHelperTool.spec()).is_ok());
    assert_eq!(BuiltInCommand::GetVersion.spec().rule(), &Rule::ALLOW);
}

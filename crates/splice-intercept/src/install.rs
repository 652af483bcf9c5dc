//! Pipeline installation rules
//!
//! [`InterceptionInstaller`] turns an [`InstallConfig`] into the structural
//! rules that hook the host's acceptor and handler. Each hook prepends
//!
//! ```text
//! aload_0
//! invokestatic <owner>.<hook>(L<edited unit>;)V
//! ```
//!
//! to the configured method, handing `this` to the companion runtime which
//! wraps it in a proxy. Constructors cannot be hooked: `this` is still
//! uninitialised at their first instruction.

use serde::{Deserialize, Serialize};
use splice_rules::{MethodEdit, MethodRule, RuleError, TransformationRule};
use splice_unit::{access, ClassFile, NameError, UnitName, VersionTag};

const ALOAD_0: u8 = 0x2a;
const INVOKESTATIC: u8 = 0xb8;

/// Stack depth the hook prologue needs
const HOOK_STACK: u16 = 1;

/// Whether `method` is an instance or class initialiser
fn is_initializer(method: &str) -> bool {
    method == "<init>" || method == "<clinit>"
}

/// Edit that prepends a static hook call receiving `this`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookCall {
    owner: UnitName,
    hook: String,
}

impl HookCall {
    /// Call `owner.hook` at method entry
    #[inline]
    #[must_use]
    pub fn new(owner: UnitName, hook: impl Into<String>) -> Self {
        Self {
            owner,
            hook: hook.into(),
        }
    }

    /// Unit declaring the hook
    #[inline]
    #[must_use]
    pub fn owner(&self) -> &UnitName {
        &self.owner
    }

    /// Hook method name
    #[inline]
    #[must_use]
    pub fn hook(&self) -> &str {
        &self.hook
    }
}

impl MethodEdit for HookCall {
    fn edit(&self, class: &mut ClassFile, index: usize) -> Result<(), RuleError> {
        let rule = format!("hook {}.{}", self.owner, self.hook);
        let Some(method) = class.methods.get(index) else {
            return Err(RuleError::failed(rule, format!("no method at index {index}")));
        };
        if is_initializer(&class.pool.utf8(method.name_index)?) {
            return Err(RuleError::failed(rule, "receiver is uninitialised in an initialiser"));
        }
        if method.access_flags & access::STATIC != 0 {
            return Err(RuleError::failed(rule, "static method has no receiver"));
        }
        let mut code = class
            .method_code(index)?
            .ok_or_else(|| RuleError::failed(&rule, "method has no body"))?;

        let receiver = format!("(L{};)V", class.name()?);
        let method_ref = class
            .pool
            .intern_method_ref(self.owner.as_str(), &self.hook, &receiver)?;
        let [hi, lo] = method_ref.to_be_bytes();

        code.insert_prologue(&class.pool, &[ALOAD_0, INVOKESTATIC, hi, lo], HOOK_STACK)?;
        class.set_method_code(index, &code)?;
        Ok(())
    }
}

/// Host method to hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookPoint {
    /// Unit declaring the method
    pub unit: String,
    /// Method name
    pub method: String,
    /// Method descriptor
    pub descriptor: String,
}

/// Settings for installing the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Version written into the hook tags
    pub version: String,
    /// Companion unit declaring the static hooks
    pub hook_owner: String,
    /// Hook receiving the acceptor
    #[serde(default = "default_acceptor_hook")]
    pub acceptor_hook: String,
    /// Hook receiving each handler
    #[serde(default = "default_handler_hook")]
    pub handler_hook: String,
    /// Method run once per host acceptor
    pub acceptor: HookPoint,
    /// Method run once per connection handler
    pub handler: HookPoint,
    /// Companion prefixes holding the proxy runtime
    #[serde(default)]
    pub runtime_prefixes: Vec<String>,
}

fn default_acceptor_hook() -> String {
    "wrapAcceptor".to_string()
}

fn default_handler_hook() -> String {
    "wrapHandler".to_string()
}

/// Errors building install rules
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// Configured unit name is invalid
    #[error("invalid unit name in intercept config: {0}")]
    Name(#[from] NameError),

    /// Hook point is a constructor or static initialiser
    #[error("cannot hook initialiser {unit}.{method}")]
    Initializer { unit: String, method: String },
}

/// Produces the rules that install the pipeline
#[derive(Debug, Clone)]
pub struct InterceptionInstaller {
    config: InstallConfig,
    tag: VersionTag,
}

impl InterceptionInstaller {
    /// Create an installer whose tags use the `tag_carrier` annotation
    #[must_use]
    pub fn new(config: InstallConfig, tag_carrier: &str) -> Self {
        let tag = VersionTag::new(tag_carrier, format!("intercept-{}", config.version));
        Self { config, tag }
    }

    /// Tag attached to both hooked methods
    #[inline]
    #[must_use]
    pub fn tag(&self) -> &VersionTag {
        &self.tag
    }

    /// Companion prefixes the engine must inject alongside the hooks
    #[must_use]
    pub fn companion_prefixes(&self) -> Vec<String> {
        let mut prefixes = self.config.runtime_prefixes.clone();
        if prefixes.is_empty() {
            if let Ok(owner) = self.config.hook_owner.parse::<UnitName>() {
                prefixes.push(format!("{}/", owner.package()));
            }
        }
        prefixes
    }

    /// Acceptor and handler hook rules
    ///
    /// # Errors
    /// Returns [`InstallError::Name`] if a configured unit name is invalid, or
    /// [`InstallError::Initializer`] if a hook point is an initialiser
    pub fn rules(&self) -> Result<Vec<TransformationRule>, InstallError> {
        let owner: UnitName = self.config.hook_owner.parse()?;
        let hooks = [
            ("intercept-acceptor", &self.config.acceptor, &self.config.acceptor_hook),
            ("intercept-handler", &self.config.handler, &self.config.handler_hook),
        ];
        hooks
            .into_iter()
            .map(|(name, point, hook)| -> Result<_, InstallError> {
                if is_initializer(&point.method) {
                    return Err(InstallError::Initializer {
                        unit: point.unit.clone(),
                        method: point.method.clone(),
                    });
                }
                Ok(TransformationRule::structural(MethodRule::new(
                    name,
                    point.unit.parse()?,
                    point.method.clone(),
                    point.descriptor.clone(),
                    self.tag.clone(),
                    HookCall::new(owner.clone(), hook.clone()),
                )))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use splice_rules::{RuleOutcome, StructuralRule};
    use splice_unit::{CodeBody, Constant, TagSite, UnitBuilder};

    const CARRIER: &str = "splice/runtime/PatchVersion";

    fn config() -> InstallConfig {
        InstallConfig {
            version: "3".into(),
            hook_owner: "splice/runtime/Hooks".into(),
            acceptor_hook: default_acceptor_hook(),
            handler_hook: default_handler_hook(),
            acceptor: HookPoint {
                unit: "host/net/Server".into(),
                method: "start".into(),
                descriptor: "()V".into(),
            },
            handler: HookPoint {
                unit: "host/net/Session".into(),
                method: "start".into(),
                descriptor: "()V".into(),
            },
            runtime_prefixes: Vec::new(),
        }
    }

    fn server() -> Vec<u8> {
        UnitBuilder::new("host/net/Server")
            .method(access::PUBLIC, "start", "()V", Some(CodeBody::new(0, 1, vec![0xb1])))
            .method(access::STATIC, "main", "()V", Some(CodeBody::new(0, 0, vec![0xb1])))
            .dump()
            .unwrap()
    }

    #[test]
    fn hook_call_prepends_invokestatic() {
        let mut class = ClassFile::parse(&server()).unwrap();
        let hook = HookCall::new("splice/runtime/Hooks".parse().unwrap(), "wrapAcceptor");
        hook.edit(&mut class, 0).unwrap();

        let code = class.method_code(0).unwrap().unwrap();
        assert_eq!(code.code.len(), 5);
        assert_eq!(&code.code[..2], &[ALOAD_0, INVOKESTATIC]);
        assert_eq!(code.max_stack, 1);

        let index = u16::from_be_bytes([code.code[2], code.code[3]]);
        let &Constant::MethodRef {
            class: owner,
            name_and_type,
        } = class.pool.get(index).unwrap()
        else {
            panic!("expected method ref");
        };
        assert_eq!(class.pool.class_name(owner).unwrap(), "splice/runtime/Hooks");
        let &Constant::NameAndType { name, descriptor } = class.pool.get(name_and_type).unwrap()
        else {
            panic!("expected name and type");
        };
        assert_eq!(class.pool.utf8(name).unwrap(), "wrapAcceptor");
        assert_eq!(class.pool.utf8(descriptor).unwrap(), "(Lhost/net/Server;)V");
    }

    #[test]
    fn hook_call_rejects_static_method() {
        let mut class = ClassFile::parse(&server()).unwrap();
        let hook = HookCall::new("splice/runtime/Hooks".parse().unwrap(), "wrapAcceptor");
        assert!(hook.edit(&mut class, 1).is_err());
    }

    /// Session whose constructor calls `Object.<init>` before returning
    fn session_with_constructor() -> Vec<u8> {
        let mut builder = UnitBuilder::new("host/net/Session");
        let init = builder
            .pool_mut()
            .intern_method_ref("java/lang/Object", "<init>", "()V")
            .unwrap();
        let [hi, lo] = init.to_be_bytes();
        builder
            .method(
                access::PUBLIC,
                "<init>",
                "()V",
                Some(CodeBody::new(1, 1, vec![ALOAD_0, 0xb7, hi, lo, 0xb1])),
            )
            .dump()
            .unwrap()
    }

    #[test]
    fn hook_call_rejects_constructor() {
        let bytes = session_with_constructor();
        let mut class = ClassFile::parse(&bytes).unwrap();
        let index = class.find_method("<init>", "()V").unwrap();
        let hook = HookCall::new("splice/runtime/Hooks".parse().unwrap(), "wrapHandler");

        assert!(hook.edit(&mut class, index).is_err());
        assert_eq!(class.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn installer_rejects_initializer_hook_points() {
        let mut constructor = config();
        constructor.handler.method = "<init>".into();
        assert!(matches!(
            InterceptionInstaller::new(constructor, CARRIER).rules(),
            Err(InstallError::Initializer { .. })
        ));

        let mut clinit = config();
        clinit.acceptor.method = "<clinit>".into();
        assert!(InterceptionInstaller::new(clinit, CARRIER).rules().is_err());
    }

    #[test]
    fn installer_rules_target_hook_points() {
        let installer = InterceptionInstaller::new(config(), CARRIER);
        let rules = installer.rules().unwrap();
        let targets: Vec<_> = rules.iter().map(|r| r.target().as_str().to_string()).collect();
        assert_eq!(targets, vec!["host/net/Server", "host/net/Session"]);
        assert!(rules.iter().all(|r| r.tag() == installer.tag()));
        assert_eq!(installer.tag().version(), "intercept-3");
    }

    #[test]
    fn installer_rule_patches_once() {
        let installer = InterceptionInstaller::new(config(), CARRIER);
        let rules = installer.rules().unwrap();
        let TransformationRule::Structural(acceptor) = &rules[0] else {
            panic!("expected structural rule");
        };

        let bytes = server();
        let RuleOutcome::Patched(patched) =
            acceptor.apply(ClassFile::parse(&bytes).unwrap(), &bytes).unwrap()
        else {
            panic!("expected patch");
        };
        let class = ClassFile::parse(&patched).unwrap();
        assert!(class.has_tag(TagSite::Method(0), installer.tag()).unwrap());
        assert_eq!(
            acceptor.apply(class, &patched).unwrap(),
            RuleOutcome::Unchanged
        );
    }

    #[test]
    fn installer_default_prefix_is_hook_package() {
        let installer = InterceptionInstaller::new(config(), CARRIER);
        assert_eq!(installer.companion_prefixes(), vec!["splice/runtime/".to_string()]);

        let mut explicit = config();
        explicit.runtime_prefixes = vec!["splice/proxy/".into()];
        let installer = InterceptionInstaller::new(explicit, CARRIER);
        assert_eq!(installer.companion_prefixes(), vec!["splice/proxy/".to_string()]);
    }

    #[test]
    fn installer_rejects_bad_names() {
        let mut bad = config();
        bad.hook_owner = String::new();
        assert!(InterceptionInstaller::new(bad, CARRIER).rules().is_err());
    }

    #[test]
    fn install_config_from_toml() {
        let config: InstallConfig = toml::from_str(
            r#"
            version = "3"
            hook_owner = "splice/runtime/Hooks"

            [acceptor]
            unit = "host/net/Server"
            method = "start"
            descriptor = "()V"

            [handler]
            unit = "host/net/Session"
            method = "start"
            descriptor = "()V"
            "#,
        )
        .unwrap();
        assert_eq!(config.acceptor_hook, "wrapAcceptor");
        assert_eq!(config.handler_hook, "wrapHandler");
        assert!(config.runtime_prefixes.is_empty());
    }
}

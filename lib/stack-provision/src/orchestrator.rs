//! Composition of all provisioning units into one plan

use crate::addons::{default_addons, Addon};
use crate::{cluster, network, verification};
use stack_core::{validate, Result, StackConfig, StackPlan};
use tracing::{debug, info};

/// Compose the stack with the default add-ons
pub fn compose(config: &StackConfig) -> Result<StackPlan> {
    compose_with(config, &default_addons(), config.addons.secrets.self_test)
}

/// Compose the stack including the secrets mount self-test
pub fn compose_with_self_test(config: &StackConfig) -> Result<StackPlan> {
    compose_with(config, &default_addons(), true)
}

/// Compose network, then cluster, then every enabled add-on in order.
///
/// The returned plan has passed [`validate`].
pub fn compose_with(
    config: &StackConfig,
    addons: &[Box<dyn Addon>],
    self_test: bool,
) -> Result<StackPlan> {
    config.validate()?;
    let mut plan = StackPlan::new(&config.environment);

    let network = network::provision(&mut plan, config)?;
    let cluster = cluster::provision(&mut plan, config, &network)?;

    for addon in addons {
        if !addon.enabled(config) {
            debug!("Add-on {} disabled", addon.name());
            continue;
        }
        let mut depends_on = vec![cluster::UNIT];
        depends_on.extend(addon.depends_on(config));
        plan.begin_unit(addon.name(), &depends_on)?;
        addon.provision(&mut plan, config, &cluster)?;
    }

    if self_test {
        verification::provision(&mut plan, config, &cluster)?;
    }

    validate(&plan)?;

    info!(
        environment = %config.environment,
        resources = plan.resources().len(),
        units = plan.units().len(),
        "Stack composed"
    );
    Ok(plan)
}

//! Cross-reference and dependency-cycle checks over structurally valid parts.

use super::schema::{AgentType, ManifestParts};
use std::collections::{HashMap, HashSet};

/// Runs the cross-reference pass, appending every violation found.
/// Returns non-fatal warnings.
pub fn check_references(parts: &ManifestParts, violations: &mut Vec<String>) -> Vec<String> {
    let mut warnings = Vec::new();
    let agent_ids: HashSet<&str> = parts.agents.iter().map(|a| a.id.as_str()).collect();
    let artifact_files: HashSet<&str> = parts.artifacts.iter().map(|a| a.filename.as_str()).collect();
    let imported: HashSet<&str> = parts
        .pipeline
        .imports
        .values()
        .flatten()
        .map(String::as_str)
        .collect();
    let pipeline = &parts.pipeline;

    for id in &pipeline.order {
        if !agent_ids.contains(id.as_str()) {
            violations.push(format!("pipeline: order references undeclared agent {}", id));
        }
    }
    for id in &pipeline.on_demand {
        if !agent_ids.contains(id.as_str()) {
            violations.push(format!("pipeline: on_demand references undeclared agent {}", id));
        }
        if pipeline.order.contains(id) {
            violations.push(format!(
                "pipeline: agent {} is listed in both order and on_demand",
                id
            ));
        }
    }
    for agent in &parts.agents {
        let in_pipeline = pipeline.order.contains(&agent.id) || pipeline.on_demand.contains(&agent.id);
        if !in_pipeline && agent.agent_type == AgentType::Core {
            warnings.push(format!("agent {} is not part of the pipeline", agent.id));
        }
    }

    for artifact in &parts.artifacts {
        if !artifact.owner.is_empty() && !agent_ids.contains(artifact.owner.as_str()) {
            violations.push(format!(
                "artifacts: '{}' is owned by undeclared agent {}",
                artifact.filename, artifact.owner
            ));
        }
    }

    for agent in &parts.agents {
        for file in &agent.produces {
            if !artifact_files.contains(file.as_str()) {
                violations.push(format!(
                    "agents: {} produces undeclared artifact '{}'",
                    agent.id, file
                ));
            }
        }
        for consumed in &agent.consumes {
            match &consumed.from_workflow {
                Some(workflow) => match pipeline.imports.get(workflow) {
                    None => violations.push(format!(
                        "agents: {} imports '{}' from workflow '{}' which is not declared in input_from",
                        agent.id, consumed.file, workflow
                    )),
                    Some(files) if !files.contains(&consumed.file) => violations.push(format!(
                        "agents: {} imports '{}' which input_from.{} does not list",
                        agent.id, consumed.file, workflow
                    )),
                    Some(_) => {}
                },
                None => {
                    let file = consumed.file.as_str();
                    if !artifact_files.contains(file) && !imported.contains(file) {
                        violations.push(format!(
                            "agents: {} consumes undeclared artifact '{}'",
                            agent.id, file
                        ));
                    }
                }
            }
        }
        for target in &agent.handoff_next {
            if !agent_ids.contains(target.as_str()) {
                violations.push(format!(
                    "agents: {} declares handoff to undeclared agent {}",
                    agent.id, target
                ));
            }
        }
    }

    let cycle_names: HashSet<&str> = pipeline.cycles.iter().map(|c| c.name.as_str()).collect();
    for instruction in &parts.instructions {
        match parts.agents.iter().find(|a| a.id == instruction.id) {
            None => violations.push(format!(
                "instructions: {} does not match any declared agent",
                instruction.id
            )),
            Some(agent) if !instruction.slug.is_empty() && agent.slug != instruction.slug => {
                violations.push(format!(
                    "instructions: {} has slug '{}' but the agent's slug is '{}'",
                    instruction.id, instruction.slug, agent.slug
                ))
            }
            Some(_) => {}
        }
        if let Some(cycle) = &instruction.cycle {
            if !cycle_names.contains(cycle.as_str()) {
                violations.push(format!(
                    "instructions: {} references undeclared cycle '{}'",
                    instruction.id, cycle
                ));
            }
        }
    }
    for agent in &parts.agents {
        if !parts.instructions.iter().any(|i| i.id == agent.id) {
            warnings.push(format!("agent {} has no instructions", agent.id));
        }
    }

    check_stages(parts, violations);

    for checkpoint in &pipeline.checkpoints {
        if !agent_ids.contains(checkpoint.agent.as_str()) {
            violations.push(format!(
                "checkpoints: {} is bound to undeclared agent {}",
                checkpoint.id, checkpoint.agent
            ));
        }
        for file in &checkpoint.required_artifacts {
            if !artifact_files.contains(file.as_str()) {
                violations.push(format!(
                    "checkpoints: {} requires undeclared artifact '{}'",
                    checkpoint.id, file
                ));
            }
        }
    }

    for cycle in &pipeline.cycles {
        for member in &cycle.agents {
            if !agent_ids.contains(member.as_str()) {
                violations.push(format!(
                    "cycles: '{}' references undeclared agent {}",
                    cycle.name, member
                ));
            }
        }
    }

    warnings
}

fn check_stages(parts: &ManifestParts, violations: &mut Vec<String>) {
    let pipeline = &parts.pipeline;
    if pipeline.stages.is_empty() {
        return;
    }
    let mut assigned: HashMap<&str, &str> = HashMap::new();
    for stage in &pipeline.stages {
        for agent in &stage.agents {
            if !pipeline.order.contains(agent) && !pipeline.on_demand.contains(agent) {
                violations.push(format!(
                    "stages: '{}' lists agent {} which is not in the pipeline",
                    stage.id, agent
                ));
            }
            if let Some(previous) = assigned.insert(agent.as_str(), stage.id.as_str()) {
                violations.push(format!(
                    "stages: agent {} appears in both '{}' and '{}'",
                    agent, previous, stage.id
                ));
            }
        }
    }
    for agent in &pipeline.order {
        if !assigned.contains_key(agent.as_str()) {
            violations.push(format!("stages: agent {} is not covered by any stage", agent));
        }
    }
}

/// Flags agents that depend on artifacts only producible downstream of them.
///
/// Producers of a file are the agents listing it in `produces` plus its
/// declared owner. Optional consumes and cross-workflow imports are exempt,
/// as are dependencies where consumer and some producer share a declared
/// iteration cycle.
pub fn check_cycles(parts: &ManifestParts, violations: &mut Vec<String>) {
    let order = &parts.pipeline.order;
    let position: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(index, id)| (id.as_str(), index))
        .collect();

    let mut producers: HashMap<&str, Vec<&str>> = HashMap::new();
    for agent in &parts.agents {
        for file in &agent.produces {
            producers.entry(file.as_str()).or_default().push(agent.id.as_str());
        }
    }
    for artifact in &parts.artifacts {
        let entry = producers.entry(artifact.filename.as_str()).or_default();
        if !artifact.owner.is_empty() && !entry.contains(&artifact.owner.as_str()) {
            entry.push(artifact.owner.as_str());
        }
    }

    for consumer_id in order {
        let Some(consumer) = parts.agents.iter().find(|a| &a.id == consumer_id) else {
            continue;
        };
        let consumer_pos = position[consumer_id.as_str()];
        for consumed in consumer
            .consumes
            .iter()
            .filter(|c| c.required && c.from_workflow.is_none())
        {
            let Some(makers) = producers.get(consumed.file.as_str()) else {
                continue;
            };
            if makers.iter().any(|m| *m == consumer_id.as_str()) {
                continue;
            }
            let only_downstream = makers
                .iter()
                .all(|m| position.get(m).is_some_and(|pos| *pos > consumer_pos));
            if !only_downstream {
                continue;
            }
            let covered = makers.iter().any(|m| share_cycle(parts, consumer_id, m));
            if !covered {
                violations.push(format!(
                    "cycle: agent {} consumes '{}' which only downstream agent(s) {} produce; declare an iteration cycle or reorder the pipeline",
                    consumer_id,
                    consumed.file,
                    makers.join(", ")
                ));
            }
        }
    }
}

fn share_cycle(parts: &ManifestParts, a: &str, b: &str) -> bool {
    parts.pipeline.cycles.iter().any(|cycle| {
        cycle.agents.iter().any(|m| m == a) && cycle.agents.iter().any(|m| m == b)
    })
}

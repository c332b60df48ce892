use crate::error::CliError;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use orchard_core::config::Config;

pub fn handle_agents(config: &Config) -> Result<(), CliError> {
    if config.agents.is_empty() {
        println!("No agents configured.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Name", "Address", "Scheduler", "Workdir", "Limits"]);
    for agent in config.agents.values() {
        table.add_row(vec![
            agent.name.clone(),
            agent.address(),
            agent.dialect.to_string(),
            agent.workdir.display().to_string(),
            format!(
                "{} min, {} cores, {} nodes",
                agent.max_walltime, agent.max_cores, agent.max_nodes
            ),
        ]);
    }
    println!("{table}");
    Ok(())
}

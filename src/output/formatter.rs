use colored::Colorize;

use crate::planner::{PlannedAction, PlannedChange, StackPlan};
use crate::resource::status::{describe, ResourceState, Status};
use crate::state::{ResourceEvent, ResourceRecord, StackRecord};

/// Print a success message.
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg.green());
}

/// Print an error message.
pub fn print_error(msg: &str) {
    println!("{} {}", "✗".red().bold(), msg.red());
}

/// Color a lifecycle state the way the listings show it.
fn colored_state(state: Option<ResourceState>) -> String {
    let text = describe(state);
    match state {
        None => text.dimmed().to_string(),
        Some(s) if s.is_deleted() => text.dimmed().to_string(),
        Some(s) => match s.status {
            Status::Complete => text.green().to_string(),
            Status::Failed => text.red().to_string(),
            Status::InProgress => text.yellow().to_string(),
        },
    }
}

/// Print a stack plan in a Terraform-like format.
pub fn print_plan(plan: &StackPlan) {
    println!();

    let actionable: Vec<&PlannedChange> = plan
        .changes
        .iter()
        .filter(|c| c.action != PlannedAction::NoOp)
        .collect();

    if actionable.is_empty() {
        println!("{}", "No changes. Stack is up-to-date.".green());
        return;
    }

    println!("Resource actions are indicated with the following symbols:");
    let has = |action: PlannedAction| actionable.iter().any(|c| c.action == action);
    if has(PlannedAction::Create) {
        println!("  {} create", "+".green().bold());
    }
    if has(PlannedAction::Update) {
        println!("  {} update in-place", "~".yellow().bold());
    }
    if has(PlannedAction::Replace) {
        println!(
            "  {} destroy and then create replacement",
            "-/+".magenta().bold()
        );
    }
    if has(PlannedAction::Delete) {
        println!("  {} destroy", "-".red().bold());
    }

    println!();
    println!("Stack {} will perform the following actions:", plan.stack.bold());
    println!();

    for change in &actionable {
        print_change(change);
    }

    println!("{}", plan);
    println!();
}

fn print_change(change: &PlannedChange) {
    let (color_fn, action_desc): (fn(&str) -> colored::ColoredString, &str) = match change.action {
        PlannedAction::Create => (|s: &str| s.green(), "will be created"),
        PlannedAction::Update => (|s: &str| s.yellow(), "will be updated in-place"),
        PlannedAction::Delete => (|s: &str| s.red(), "will be destroyed"),
        PlannedAction::Replace => (|s: &str| s.magenta(), "must be replaced"),
        PlannedAction::NoOp => return,
    };

    println!(
        "  {} {} {}",
        "#".dimmed(),
        change.name.bold(),
        action_desc.dimmed()
    );
    let header = format!("  {} \"{}\" \"{}\" {{", change.action, change.resource_type, change.name);
    println!("{}", color_fn(&header));

    let max_key_len = change
        .changed_properties
        .iter()
        .map(|(k, _)| k.len())
        .max()
        .unwrap_or(0)
        .min(35);
    for (key, value) in &change.changed_properties {
        let marker = if change.requires_replace.contains(key) {
            "#"
        } else if change.action == PlannedAction::Update {
            "~"
        } else {
            "+"
        };
        let line = format!(
            "      {} {:<width$} = {}",
            marker,
            key,
            format_value_short(value),
            width = max_key_len
        );
        println!("{}", color_fn(&line));
    }

    for reason in change
        .requires_replace
        .iter()
        .filter(|r| !change.changed_properties.iter().any(|(k, _)| k == *r))
    {
        println!("{}", color_fn(&format!("      # {} forces replacement", reason)));
    }

    println!("{}", color_fn("    }"));
    println!();
}

/// Format a JSON value for short inline display.
fn format_value_short(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => format!("\"{}\"", s),
        serde_json::Value::Null => "(known after apply)".dimmed().to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Array(arr) => {
            if arr.is_empty() {
                "[]".to_string()
            } else if arr.len() <= 4 && arr.iter().all(|v| v.is_string()) {
                let items: Vec<String> = arr.iter().map(format_value_short).collect();
                format!("[{}]", items.join(", "))
            } else {
                format!("[...{} items]", arr.len())
            }
        }
        serde_json::Value::Object(obj) => {
            if obj.is_empty() {
                "{}".to_string()
            } else if obj.len() <= 4 {
                let items: Vec<String> = obj
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, format_value_short(v)))
                    .collect();
                format!("{{ {} }}", items.join(", "))
            } else {
                format!("{{...{} keys}}", obj.len())
            }
        }
    }
}

/// Print every stored stack.
pub fn print_stack_list(stacks: &[StackRecord]) {
    if stacks.is_empty() {
        println!("{}", "No stacks in state.".dimmed());
        return;
    }

    println!();
    println!("{}", "Stacks".bold().cyan());
    println!("{}", "─".repeat(80));
    println!(
        "  {:<30} {:<22} {:<10} {}",
        "NAME".bold(),
        "STATE".bold(),
        "RESOURCES".bold(),
        "UPDATED".bold()
    );
    println!("{}", "─".repeat(80));
    for stack in stacks {
        println!(
            "  {:<30} {:<22} {:<10} {}",
            stack.name,
            colored_state(stack.state),
            stack.definition.resources.len(),
            stack.updated_at.dimmed()
        );
    }
    println!();
}

/// Print the resources of one stack.
pub fn print_resource_list(resources: &[ResourceRecord]) {
    if resources.is_empty() {
        println!("{}", "No resources in state.".dimmed());
        return;
    }

    println!();
    println!("{}", "Resources".bold().cyan());
    println!("{}", "─".repeat(90));
    println!(
        "  {:<24} {:<24} {:<22} {}",
        "NAME".bold(),
        "TYPE".bold(),
        "STATE".bold(),
        "PHYSICAL ID".bold()
    );
    println!("{}", "─".repeat(90));

    for resource in resources {
        println!(
            "  {:<24} {:<24} {:<22} {}",
            resource.name,
            resource.resource_type,
            colored_state(resource.state),
            resource.resource_id.as_deref().unwrap_or("-").dimmed()
        );
    }

    println!();
    println!("  {} resource(s) total.", resources.len());
    println!();
}

/// Print detailed resource state.
pub fn print_resource_detail(resource: &ResourceRecord) {
    println!();
    println!("{} {}", "Resource:".bold().cyan(), resource.name.bold());
    println!("{}", "─".repeat(60));
    println!("  {:<14} {}", "Type:".bold(), resource.resource_type);
    println!("  {:<14} {}", "State:".bold(), colored_state(resource.state));
    if !resource.status_reason.is_empty() {
        println!("  {:<14} {}", "Reason:".bold(), resource.status_reason);
    }
    println!(
        "  {:<14} {}",
        "Physical ID:".bold(),
        resource.resource_id.as_deref().unwrap_or("-")
    );
    println!("  {:<14} {}", "Created:".bold(), resource.created_at);
    println!("  {:<14} {}", "Updated:".bold(), resource.updated_at);

    if !resource.properties.is_empty() {
        println!();
        println!("  {}:", "Properties".bold());
        for (key, value) in &resource.properties {
            println!("    {:<20} = {}", key, format_value_short(value));
        }
    }

    if !resource.data.is_empty() {
        println!();
        println!("  {}:", "Data".bold());
        for key in resource.data.keys() {
            // Values may be secrets.
            println!("    {:<20} = {}", key, "(sensitive)".dimmed());
        }
    }

    println!("{}", "─".repeat(60));
    println!();
}

/// Print lifecycle events, oldest first.
pub fn print_events(events: &[ResourceEvent]) {
    if events.is_empty() {
        println!("{}", "No events recorded.".dimmed());
        return;
    }

    println!();
    for event in events {
        let state = colored_state(Some(event.state()));
        let reason = if event.reason.is_empty() {
            String::new()
        } else {
            format!("  {}", event.reason.dimmed())
        };
        println!(
            "  {}  {:<24} {:<22}{}",
            event.timestamp.dimmed(),
            event.resource_name,
            state,
            reason
        );
    }
    println!();
}

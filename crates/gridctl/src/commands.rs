use gridctl_client::ControllerClient;
use serde_json::Value;

use crate::Command;

pub async fn run(client: &ControllerClient, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Status => println!("{}", client.get_status().await?),
        Command::Roles => print_json(&client.get_role_info().await?)?,
        Command::PublicIps => print_lines(client.get_all_public_ips().await?),
        Command::PrivateIps => print_lines(client.get_all_private_ips().await?),
        Command::Stats => print_json(&client.get_cluster_stats().await?)?,
        Command::AppMap => print_json(&client.get_app_info_map().await?)?,
        Command::GetProperty { regex } => print_json(&client.get_property(&regex).await?)?,
        Command::SetProperty { name, value } => {
            println!("{}", client.set_property(&name, &value).await?);
        }
        Command::DeploymentId => println!("{}", client.get_deployment_id().await?),
        Command::WaitDb => {
            let host = client.wait_for_database_host().await?;
            println!("{host}");
        }
        Command::WaitRoles { roles } => {
            client.wait_for_roles(roles.as_slice()).await?;
            println!("✓ {} running on {}", roles.join(", "), client.target());
        }
        Command::AddRouting { app, ip, port } => {
            println!("{}", client.add_routing_until_ready(&app, &ip, port).await?);
        }
        Command::RemoveRouting { app, ip, port } => {
            println!("{}", client.remove_appserver_from_routing(&app, &ip, port).await?);
        }
        Command::StopApp { app } => println!("{}", client.stop_app(&app).await?),
        Command::RunGroomer => println!("{}", client.run_groomer().await?),
    }
    Ok(())
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}

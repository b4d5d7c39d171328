use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};
use std::error::Error;
use tracejob::types::HOSTNAME_LABEL_KEY;

#[derive(Debug, PartialEq, Eq)]
pub enum Target<'a> {
    Node(&'a str),
    Pod(&'a str),
}

/// Parse `NAME` or `TYPE/NAME`; bare names are nodes.
pub fn parse_resource(resource: &str) -> Result<Target<'_>, String> {
    let (kind, name) = resource.split_once('/').unwrap_or(("node", resource));
    if name.is_empty() {
        return Err(format!("missing name in {}", resource));
    }
    match kind {
        "node" | "nodes" | "no" => Ok(Target::Node(name)),
        "pod" | "pods" | "po" => Ok(Target::Pod(name)),
        other => Err(format!("resource type {} is not traceable, expected node/NAME", other)),
    }
}

/// Find the hostname label of the node a trace must run on.
pub async fn resolve_hostname(client: &Client, resource: &str) -> Result<String, Box<dyn Error>> {
    let name = match parse_resource(resource)? {
        Target::Node(name) => name,
        Target::Pod(_) => {
            return Err("running bpftrace programs against pods is not supported yet".into())
        }
    };
    let nodes: Api<Node> = Api::all(client.clone());
    let node = nodes.get(name).await?;
    node.metadata
        .labels
        .and_then(|mut labels| labels.remove(HOSTNAME_LABEL_KEY))
        .ok_or_else(|| format!("label {} not found in node {}", HOSTNAME_LABEL_KEY, name).into())
}

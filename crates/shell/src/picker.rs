//! Target selection: namespace, workload, pod and container.

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use cluster_api::{ClusterGateway, ResourceKind};
use tracing::info;

use crate::session::Target;

/// Target parts given up front; missing parts are asked for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetArgs {
    pub namespace: Option<String>,
    pub kind: Option<ResourceKind>,
    pub resource: Option<String>,
    pub container: Option<String>,
}

/// Picks one of several options.
pub trait Chooser {
    fn choose(&mut self, title: &str, options: &[String]) -> Result<String>;
}

/// Numbered list on stdout. Accepts a number, an exact name, or a filter that
/// narrows the list.
pub struct StdinChooser<R, W> {
    input: R,
    output: W,
}

impl StdinChooser<io::StdinLock<'static>, io::Stdout> {
    pub fn terminal() -> Self {
        Self {
            input: io::stdin().lock(),
            output: io::stdout(),
        }
    }
}

impl<R: BufRead, W: Write> StdinChooser<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> Chooser for StdinChooser<R, W> {
    fn choose(&mut self, title: &str, options: &[String]) -> Result<String> {
        let mut visible: Vec<&String> = options.iter().collect();
        loop {
            writeln!(self.output, "{title}:")?;
            for (idx, option) in visible.iter().enumerate() {
                writeln!(self.output, "  {:>3}) {option}", idx + 1)?;
            }
            write!(self.output, "Select number or type to filter: ")?;
            self.output.flush()?;

            let mut answer = String::new();
            let read = self
                .input
                .read_line(&mut answer)
                .context("failed to read selection")?;
            if read == 0 {
                bail!("selection aborted");
            }
            let answer = answer.trim();
            if answer.is_empty() {
                continue;
            }
            if let Ok(n) = answer.parse::<usize>() {
                if let Some(option) = n.checked_sub(1).and_then(|i| visible.get(i)) {
                    return Ok((*option).clone());
                }
                writeln!(self.output, "No entry {n}.")?;
                continue;
            }
            if let Some(exact) = options.iter().find(|o| o.as_str() == answer) {
                return Ok(exact.clone());
            }
            let filtered: Vec<&String> = options.iter().filter(|o| o.contains(answer)).collect();
            match filtered.len() {
                0 => writeln!(self.output, "Nothing matches '{answer}'.")?,
                1 => return Ok(filtered[0].clone()),
                _ => visible = filtered,
            }
        }
    }
}

fn pick(chooser: &mut dyn Chooser, title: &str, options: Vec<String>) -> Result<String> {
    match options.len() {
        0 => bail!("no {} found", title.to_lowercase()),
        1 => Ok(options.into_iter().next().unwrap_or_default()),
        _ => chooser.choose(title, &options),
    }
}

/// Resolve a full target, asking `chooser` for whatever `args` leave open.
/// Single candidates are taken without asking.
pub fn resolve_target(
    gateway: &dyn ClusterGateway,
    args: &TargetArgs,
    chooser: &mut dyn Chooser,
) -> Result<Target> {
    let namespace = match &args.namespace {
        Some(ns) => ns.clone(),
        None => pick(
            chooser,
            "Namespace",
            gateway.list_namespaces().context("listing namespaces")?,
        )?,
    };

    let kind = match args.kind {
        Some(kind) => kind,
        None => {
            let kinds = ResourceKind::ALL.iter().map(|k| k.to_string()).collect();
            let chosen = pick(chooser, "Resource type", kinds)?;
            ResourceKind::parse(&chosen).with_context(|| format!("unknown resource type {chosen}"))?
        }
    };

    let resource = match &args.resource {
        Some(name) => name.clone(),
        None => pick(
            chooser,
            if kind.is_workload() { "Workload" } else { "Pod" },
            gateway
                .list_resources(&namespace, kind)
                .with_context(|| format!("listing {kind}s in {namespace}"))?,
        )?,
    };

    let pod = if kind.is_workload() {
        pick(
            chooser,
            "Pod",
            gateway
                .workload_pods(&namespace, kind, &resource)
                .with_context(|| format!("listing pods of {kind} {resource}"))?,
        )?
    } else {
        resource.clone()
    };

    let container = match &args.container {
        Some(container) => container.clone(),
        None => pick(
            chooser,
            "Container",
            gateway
                .pod_containers(&namespace, &pod)
                .with_context(|| format!("listing containers of pod {pod}"))?,
        )?,
    };

    let target = Target {
        namespace,
        kind,
        resource,
        pod,
        container,
    };
    info!(target = %target.describe(), "target selected");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_api::testing::StubGateway;
    use std::io::Cursor;

    struct Scripted(Vec<&'static str>);
    impl Chooser for Scripted {
        fn choose(&mut self, _: &str, options: &[String]) -> Result<String> {
            let answer = self.0.remove(0);
            assert!(options.iter().any(|o| o == answer), "{answer} not offered");
            Ok(answer.to_string())
        }
    }

    #[test]
    fn flags_skip_prompts() {
        let stub = StubGateway::new();
        let args = TargetArgs {
            namespace: Some("shop".to_string()),
            kind: Some(ResourceKind::Pod),
            resource: Some("web-0".to_string()),
            container: Some("app".to_string()),
        };
        let target = resolve_target(&stub, &args, &mut Scripted(vec![])).unwrap();
        assert_eq!(target, Target::pod("shop", "web-0", "app"));
        assert!(stub.calls().is_empty());
    }

    #[test]
    fn walks_workload_to_container() {
        let stub = StubGateway::new()
            .with_listing("namespaces", &["default", "shop"])
            .with_listing("deployment@shop", &["web"])
            .with_listing("pods-of:web@shop", &["web-1", "web-2"])
            .with_listing("containers:web-2@shop", &["app", "sidecar"]);
        let mut chooser = Scripted(vec!["shop", "deployment", "web-2", "sidecar"]);
        let target = resolve_target(&stub, &TargetArgs::default(), &mut chooser).unwrap();
        assert_eq!(target.kind, ResourceKind::Deployment);
        assert_eq!(target.resource, "web");
        assert_eq!(target.pod, "web-2");
        assert_eq!(target.container, "sidecar");
    }

    #[test]
    fn empty_listing_is_error() {
        let stub = StubGateway::new();
        let err = resolve_target(&stub, &TargetArgs::default(), &mut Scripted(vec![])).unwrap_err();
        assert!(err.to_string().contains("no namespace found"));
    }

    #[test]
    fn stdin_chooser_accepts_number_and_filter() {
        let options = vec!["alpha".to_string(), "beta".to_string(), "betamax".to_string()];
        let mut chooser = StdinChooser::new(Cursor::new("2\n"), Vec::new());
        assert_eq!(chooser.choose("Pod", &options).unwrap(), "beta");

        let mut chooser = StdinChooser::new(Cursor::new("max\n"), Vec::new());
        assert_eq!(chooser.choose("Pod", &options).unwrap(), "betamax");

        let mut chooser = StdinChooser::new(Cursor::new("bet\n2\n"), Vec::new());
        assert_eq!(chooser.choose("Pod", &options).unwrap(), "betamax");
    }

    #[test]
    fn stdin_chooser_eof_aborts() {
        let options = vec!["a".to_string(), "b".to_string()];
        let mut chooser = StdinChooser::new(Cursor::new(""), Vec::new());
        assert!(chooser.choose("Pod", &options).is_err());
    }
}

use std::fmt;

/// One typed argument record of a transcoder command line.
///
/// Commands are assembled from these records and only flattened to strings
/// at the process boundary ([`TranscodeCommand::to_args`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// A bare switch, e.g. `-hide_banner`.
    Flag(&'static str),
    /// A switch with a value, e.g. `-b:v 299k`.
    Opt(&'static str, String),
    /// An input URL, rendered as `-i <url>`.
    Input(String),
    /// An output URL, rendered as-is.
    Output(String),
    /// User-supplied text passed through untouched.
    Raw(String),
}

impl Arg {
    pub fn opt(name: &'static str, value: impl ToString) -> Self {
        Self::Opt(name, value.to_string())
    }

    fn push_into(&self, out: &mut Vec<String>) {
        match self {
            Self::Flag(name) => out.push((*name).to_string()),
            Self::Opt(name, value) => {
                out.push((*name).to_string());
                out.push(value.clone());
            }
            Self::Input(url) => {
                out.push("-i".to_string());
                out.push(url.clone());
            }
            Self::Output(url) | Self::Raw(url) => out.push(url.clone()),
        }
    }
}

/// A complete transcoder invocation, minus the program path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscodeCommand {
    args: Vec<Arg>,
}

impl TranscodeCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, arg: Arg) -> &mut Self {
        self.args.push(arg);
        self
    }

    pub fn extend(&mut self, args: impl IntoIterator<Item = Arg>) -> &mut Self {
        self.args.extend(args);
        self
    }

    pub fn records(&self) -> &[Arg] {
        &self.args
    }

    /// Value of the first occurrence of an option, if present.
    pub fn value_of(&self, name: &str) -> Option<&str> {
        self.args.iter().find_map(|arg| match arg {
            Arg::Opt(n, value) if *n == name => Some(value.as_str()),
            _ => None,
        })
    }

    /// All output URLs in order.
    pub fn outputs(&self) -> Vec<&str> {
        self.args
            .iter()
            .filter_map(|arg| match arg {
                Arg::Output(url) => Some(url.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Flatten to the argv form handed to the process launcher.
    pub fn to_args(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.args.len() * 2);
        for arg in &self.args {
            arg.push_into(&mut out);
        }
        out
    }
}

impl fmt::Display for TranscodeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_args().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_records_in_order() {
        let mut cmd = TranscodeCommand::new();
        cmd.push(Arg::Flag("-hide_banner"))
            .push(Arg::Input("rtsp://cam/stream".into()))
            .push(Arg::opt("-r", 30))
            .push(Arg::Raw("-tune".into()))
            .push(Arg::Output("udp://127.0.0.1:9000".into()));

        assert_eq!(
            cmd.to_args(),
            vec![
                "-hide_banner",
                "-i",
                "rtsp://cam/stream",
                "-r",
                "30",
                "-tune",
                "udp://127.0.0.1:9000"
            ]
        );
    }

    #[test]
    fn value_lookup_and_outputs() {
        let mut cmd = TranscodeCommand::new();
        cmd.push(Arg::opt("-ssrc", 5))
            .push(Arg::Output("a".into()))
            .push(Arg::opt("-ssrc", 6))
            .push(Arg::Output("b".into()));

        assert_eq!(cmd.value_of("-ssrc"), Some("5"));
        assert_eq!(cmd.value_of("-ar"), None);
        assert_eq!(cmd.outputs(), vec!["a", "b"]);
    }
}

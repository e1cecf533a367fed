use clap::{ArgAction, Parser};
use httptime::{
    Credentials, HttpVersion, OutputFailurePolicy, OutputFile, RequestDescriptor, RunOptions,
};
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about)]
pub struct Cli {
    /// The request url,like http://www.google.com
    pub url: String,
    ///  Specify request method to use
    #[arg(short = 'X', long = "request", value_name = "method")]
    pub method_option: Option<String>,
    /// HTTP POST data.
    #[arg(short = 'd', long = "data", value_name = "data")]
    pub body_option: Option<String>,
    /// The http headers, like 'Accept: text/html'.
    #[arg(short = 'H', long = "header", value_name = "header")]
    pub headers: Vec<String>,
    /// Server user and password
    #[arg(short = 'u', long = "user", value_name = "user:password")]
    pub authority_option: Option<String>,
    /// Allow insecure server connections
    #[arg(short = 'k', long = "insecure")]
    pub skip_certificate_validate: bool,
    /// CA certificates (PEM) to verify the server against.
    #[arg(long = "cacert", value_name = "file")]
    pub certificate_path_option: Option<String>,
    /// Use HTTP/1.0
    #[arg(long = "http1.0", conflicts_with = "http2")]
    pub http1_0: bool,
    /// Use HTTP/2 (https only)
    #[arg(long = "http2")]
    pub http2: bool,
    ///  Write the response body to a file.
    #[arg(short = 'o', long = "output", value_name = "file")]
    pub file_path_option: Option<String>,
    /// Prefix the body in the output file with the status line and headers.
    #[arg(short = 'i', long = "include")]
    pub include_headers: bool,
    /// Keep measuring when the output file cannot be written.
    #[arg(long = "keep-going-on-write-error")]
    pub permissive_output: bool,
    /// Number of requests to make.
    #[arg(
        short = 'n',
        long = "requests",
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub requests: u32,
    /// Pause between requests, in milliseconds.
    #[arg(long = "delay", value_name = "ms", default_value_t = 100)]
    pub delay_ms: u64,
    /// Report one result averaged over all requests.
    #[arg(short = 'a', long = "average")]
    pub average: bool,
    /// Give up on a request after this many milliseconds.
    #[arg(short = 'm', long = "max-time", value_name = "ms")]
    pub timeout_ms: Option<u64>,
    /// Show response headers in the report.
    #[arg(long = "show-headers")]
    pub show_headers: bool,
    /// Show the response body in the report.
    #[arg(long = "show-body")]
    pub show_body: bool,
    /// Print the result as JSON.
    #[arg(long = "json")]
    pub json: bool,
    ///  Make the operation more talkative
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbosity: u8,
}

impl Cli {
    pub fn descriptor(&self) -> RequestDescriptor {
        let version = if self.http2 {
            HttpVersion::Http2
        } else if self.http1_0 {
            HttpVersion::Http10
        } else {
            HttpVersion::Http11
        };
        let mut descriptor = RequestDescriptor::new(self.url.clone())
            .version(version)
            .verify_tls(!self.skip_certificate_validate)
            .keep_headers(self.show_headers)
            .keep_body(self.show_body);

        if let Some(method) = self.method_option.as_ref() {
            descriptor = descriptor.method(method.clone());
        }
        if let Some(body) = self.body_option.as_ref() {
            descriptor = descriptor.body(body.clone());
        }
        for line in &self.headers {
            descriptor = descriptor.header_line(line);
        }
        if let Some(user) = self.authority_option.as_deref() {
            descriptor = descriptor.credentials(Credentials::parse(user));
        }
        if let Some(path) = self.certificate_path_option.as_ref() {
            descriptor = descriptor.ca_file(path);
        }
        if let Some(ms) = self.timeout_ms {
            descriptor = descriptor.timeout(Duration::from_millis(ms));
        }
        if let Some(path) = self.file_path_option.as_ref() {
            let policy = if self.permissive_output {
                OutputFailurePolicy::Permissive
            } else {
                OutputFailurePolicy::Fatal
            };
            descriptor = descriptor.output(
                OutputFile::new(path)
                    .include_headers(self.include_headers)
                    .on_failure(policy),
            );
        }
        descriptor
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions::new(self.requests).delay(Duration::from_millis(self.delay_ms))
    }
}

use clap::Parser;

use crate::model::ModelOptions;
use crate::postprocess::Activation;
use crate::preprocess::ResizeMethod;
use crate::service::ServerConfig;

/// Debug mode is on only for the literal value `true`, in any case.
fn parse_debug_flag(value: &str) -> Result<bool, String> {
    Ok(value.trim().eq_ignore_ascii_case("true"))
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Image classification HTTP service", long_about = None)]
pub struct Args {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Expose error details in responses and log verbosely
    #[arg(long, env = "DEBUG", default_value = "true", value_parser = parse_debug_flag, action = clap::ArgAction::Set)]
    pub debug: bool,

    /// Maximum accepted request body in bytes
    #[arg(long, env = "MAX_UPLOAD_SIZE", default_value_t = 100 * 1024 * 1024)]
    pub max_upload_size: usize,

    /// Run inference with the CUDA execution provider
    #[arg(long, env = "USE_CUDA")]
    pub cuda: bool,

    /// ONNX Runtime intra-op thread count
    #[arg(long, env = "INTRA_THREADS")]
    pub intra_threads: Option<usize>,

    /// Input size for models with dynamic height/width
    #[arg(long, env = "IMAGE_SIZE", default_value_t = 224)]
    pub image_size: usize,

    #[arg(long, env = "RESIZE_METHOD", value_enum, default_value_t = ResizeMethod::Crop)]
    pub resize_method: ResizeMethod,

    #[arg(long, env = "ACTIVATION", value_enum, default_value_t = Activation::Softmax)]
    pub activation: Activation,
}

impl Args {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            debug: self.debug,
            max_upload_size: self.max_upload_size,
        }
    }

    pub fn model_options(&self) -> ModelOptions {
        ModelOptions {
            cuda: self.cuda,
            intra_threads: self.intra_threads,
            image_size: self.image_size,
            resize: self.resize_method,
            activation: self.activation,
        }
    }

    /// Log filter used when `RUST_LOG` is not set.
    pub fn default_log_filter(&self) -> &'static str {
        if self.debug {
            "classify_server=debug,tower_http=debug"
        } else {
            "classify_server=info,tower_http=info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_flag_values() {
        assert_eq!(parse_debug_flag("true"), Ok(true));
        assert_eq!(parse_debug_flag("True"), Ok(true));
        assert_eq!(parse_debug_flag("TRUE"), Ok(true));
        assert_eq!(parse_debug_flag("false"), Ok(false));
        assert_eq!(parse_debug_flag("1"), Ok(false));
        assert_eq!(parse_debug_flag("yes"), Ok(false));
    }

    #[test]
    fn test_explicit_arguments() {
        let args = Args::try_parse_from([
            "classify-server",
            "--port",
            "8080",
            "--debug",
            "false",
            "--resize-method",
            "pad",
            "--activation",
            "none",
            "--intra-threads",
            "2",
        ])
        .unwrap();
        assert_eq!(args.port, 8080);
        assert!(!args.debug);
        assert_eq!(args.resize_method, ResizeMethod::Pad);
        assert_eq!(args.activation, Activation::Identity);

        let options = args.model_options();
        assert_eq!(options.intra_threads, Some(2));
        assert_eq!(options.resize, ResizeMethod::Pad);

        let config = args.server_config();
        assert_eq!(config.port, 8080);
        assert!(!config.debug);
        assert_eq!(args.default_log_filter(), "classify_server=info,tower_http=info");
    }

    #[test]
    fn test_rejects_unknown_resize_method() {
        assert!(Args::try_parse_from(["classify-server", "--resize-method", "zoom"]).is_err());
    }
}

//! Hand-written prost mirrors of the WhatsApp wire protobufs the core
//! exchanges: the Noise handshake envelope, the server certificate chain,
//! the ADV device-identity blobs and the login/registration client payload.

/// Envelope carried in every handshake frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HandshakeMessage {
    #[prost(message, optional, tag = "2")]
    pub client_hello: ::core::option::Option<handshake_message::ClientHello>,
    #[prost(message, optional, tag = "3")]
    pub server_hello: ::core::option::Option<handshake_message::ServerHello>,
    #[prost(message, optional, tag = "4")]
    pub client_finish: ::core::option::Option<handshake_message::ClientFinish>,
}

pub mod handshake_message {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ClientHello {
        #[prost(bytes = "vec", tag = "1")]
        pub ephemeral: ::prost::alloc::vec::Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub r#static: ::prost::alloc::vec::Vec<u8>,
        #[prost(bytes = "vec", tag = "3")]
        pub payload: ::prost::alloc::vec::Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ServerHello {
        #[prost(bytes = "vec", tag = "1")]
        pub ephemeral: ::prost::alloc::vec::Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub r#static: ::prost::alloc::vec::Vec<u8>,
        #[prost(bytes = "vec", tag = "3")]
        pub payload: ::prost::alloc::vec::Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ClientFinish {
        #[prost(bytes = "vec", tag = "1")]
        pub r#static: ::prost::alloc::vec::Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub payload: ::prost::alloc::vec::Vec<u8>,
    }
}

/// Certificate chain delivered encrypted in the ServerHello payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CertChain {
    #[prost(message, optional, tag = "1")]
    pub leaf: ::core::option::Option<cert_chain::NoiseCertificate>,
    #[prost(message, optional, tag = "2")]
    pub intermediate: ::core::option::Option<cert_chain::NoiseCertificate>,
}

pub mod cert_chain {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct NoiseCertificate {
        #[prost(bytes = "vec", tag = "1")]
        pub details: ::prost::alloc::vec::Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub signature: ::prost::alloc::vec::Vec<u8>,
    }

    pub mod noise_certificate {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Details {
            #[prost(uint32, tag = "1")]
            pub serial: u32,
            #[prost(uint32, tag = "2")]
            pub issuer_serial: u32,
            #[prost(bytes = "vec", tag = "3")]
            pub key: ::prost::alloc::vec::Vec<u8>,
            #[prost(uint64, tag = "4")]
            pub not_before: u64,
            #[prost(uint64, tag = "5")]
            pub not_after: u64,
        }
    }
}

/// Server-signed device identity, wrapped with the ADV secret HMAC.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AdvSignedDeviceIdentityHmac {
    #[prost(bytes = "vec", tag = "1")]
    pub details: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub hmac: ::prost::alloc::vec::Vec<u8>,
}

/// Device identity as signed by the account and counter-signed by us.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AdvSignedDeviceIdentity {
    #[prost(bytes = "vec", tag = "1")]
    pub details: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub account_signature_key: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub account_signature: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub device_signature: ::prost::alloc::vec::Vec<u8>,
}

/// Inner identity details; only `key_index` is read by the core.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AdvDeviceIdentity {
    #[prost(uint32, tag = "1")]
    pub raw_id: u32,
    #[prost(uint64, tag = "2")]
    pub timestamp: u64,
    #[prost(uint32, tag = "3")]
    pub key_index: u32,
}

/// Login-or-register payload encrypted into the ClientFinish message.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientPayload {
    #[prost(uint64, tag = "1")]
    pub username: u64,
    #[prost(bool, tag = "3")]
    pub passive: bool,
    #[prost(message, optional, tag = "5")]
    pub user_agent: ::core::option::Option<client_payload::UserAgent>,
    #[prost(message, optional, tag = "6")]
    pub web_info: ::core::option::Option<client_payload::WebInfo>,
    #[prost(string, tag = "7")]
    pub push_name: ::prost::alloc::string::String,
    #[prost(enumeration = "client_payload::ConnectType", tag = "12")]
    pub connect_type: i32,
    #[prost(enumeration = "client_payload::ConnectReason", tag = "13")]
    pub connect_reason: i32,
    #[prost(uint32, tag = "18")]
    pub device: u32,
    #[prost(message, optional, tag = "19")]
    pub device_pairing_data: ::core::option::Option<client_payload::DevicePairingRegistrationData>,
    #[prost(bool, tag = "33")]
    pub pull: bool,
}

pub mod client_payload {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct UserAgent {
        #[prost(enumeration = "user_agent::Platform", tag = "1")]
        pub platform: i32,
        #[prost(message, optional, tag = "2")]
        pub app_version: ::core::option::Option<user_agent::AppVersion>,
        #[prost(string, tag = "3")]
        pub mcc: ::prost::alloc::string::String,
        #[prost(string, tag = "4")]
        pub mnc: ::prost::alloc::string::String,
        #[prost(string, tag = "5")]
        pub os_version: ::prost::alloc::string::String,
        #[prost(string, tag = "6")]
        pub manufacturer: ::prost::alloc::string::String,
        #[prost(string, tag = "7")]
        pub device: ::prost::alloc::string::String,
        #[prost(string, tag = "8")]
        pub os_build_number: ::prost::alloc::string::String,
        #[prost(enumeration = "user_agent::ReleaseChannel", tag = "12")]
        pub release_channel: i32,
        #[prost(string, tag = "13")]
        pub locale_language_iso_639_1: ::prost::alloc::string::String,
        #[prost(string, tag = "14")]
        pub locale_country_iso_3166_1_alpha_2: ::prost::alloc::string::String,
    }

    pub mod user_agent {
        #[derive(Clone, Copy, PartialEq, ::prost::Message)]
        pub struct AppVersion {
            #[prost(uint32, tag = "1")]
            pub primary: u32,
            #[prost(uint32, tag = "2")]
            pub secondary: u32,
            #[prost(uint32, tag = "3")]
            pub tertiary: u32,
            #[prost(uint32, tag = "4")]
            pub quaternary: u32,
            #[prost(uint32, tag = "5")]
            pub quinary: u32,
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum Platform {
            Android = 0,
            Ios = 1,
            Web = 14,
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum ReleaseChannel {
            Release = 0,
            Beta = 1,
            Alpha = 2,
            Debug = 3,
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct WebInfo {
        #[prost(enumeration = "web_info::WebSubPlatform", tag = "4")]
        pub web_sub_platform: i32,
    }

    pub mod web_info {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum WebSubPlatform {
            WebBrowser = 0,
            AppStore = 1,
            WinStore = 2,
            Darwin = 3,
            Win32 = 4,
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DevicePairingRegistrationData {
        #[prost(bytes = "vec", tag = "1")]
        pub e_regid: ::prost::alloc::vec::Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub e_keytype: ::prost::alloc::vec::Vec<u8>,
        #[prost(bytes = "vec", tag = "3")]
        pub e_ident: ::prost::alloc::vec::Vec<u8>,
        #[prost(bytes = "vec", tag = "4")]
        pub e_skey_id: ::prost::alloc::vec::Vec<u8>,
        #[prost(bytes = "vec", tag = "5")]
        pub e_skey_val: ::prost::alloc::vec::Vec<u8>,
        #[prost(bytes = "vec", tag = "6")]
        pub e_skey_sig: ::prost::alloc::vec::Vec<u8>,
        #[prost(bytes = "vec", tag = "7")]
        pub build_hash: ::prost::alloc::vec::Vec<u8>,
        #[prost(bytes = "vec", tag = "8")]
        pub device_props: ::prost::alloc::vec::Vec<u8>,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum ConnectType {
        CellularUnknown = 0,
        WifiUnknown = 1,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum ConnectReason {
        Push = 0,
        UserActivated = 1,
        Scheduled = 2,
        ErrorReconnect = 3,
        NetworkSwitch = 4,
        PingReconnect = 5,
    }
}

/// Companion-device properties serialized inside the registration payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceProps {
    #[prost(string, tag = "1")]
    pub os: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub version: ::core::option::Option<client_payload::user_agent::AppVersion>,
    #[prost(enumeration = "device_props::PlatformType", tag = "3")]
    pub platform_type: i32,
    #[prost(bool, tag = "4")]
    pub require_full_sync: bool,
}

pub mod device_props {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum PlatformType {
        Unknown = 0,
        Chrome = 1,
        Firefox = 2,
        Ie = 3,
        Opera = 4,
        Safari = 5,
        Edge = 6,
        Desktop = 7,
    }
}
